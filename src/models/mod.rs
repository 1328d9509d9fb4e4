pub mod guild;
pub mod poll;
