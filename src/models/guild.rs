use serde::Deserialize;

/// Requirement types a weighted poll can be based on.
pub const SUPPORTED_REQUIREMENT_TYPES: &[&str] = &["ERC20"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuildRef {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Guild {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Guild {
    /// Requirements of every role that can weight a poll, first occurrence wins.
    pub fn weighting_requirements(&self) -> Vec<Requirement> {
        let mut eligible: Vec<Requirement> = Vec::new();
        for requirement in self.roles.iter().flat_map(|role| role.requirements.iter()) {
            if !SUPPORTED_REQUIREMENT_TYPES.contains(&requirement.kind.as_str()) {
                continue;
            }
            if eligible.iter().any(|known| known.id == requirement.id) {
                continue;
            }
            eligible.push(requirement.clone());
        }
        eligible
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Requirement {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub address: Option<String>,
}
