//! Pure rendering of poll messages and their button layouts. The same
//! inputs always produce byte-identical output; results keep option order.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use super::callback::CallbackPayload;
use crate::models::poll::{PollContent, PollId, PublishedPoll, VoteTally};
use crate::platform::{Button, Keyboard, MessageRef};

pub const UNKNOWN_VOTER: &str = "Unknown_User";
const END_FORMAT: &str = "%Y-%m-%d %H:%M UTC";
const MARKDOWN_SPECIAL: &[char] = &['_', '*', '`', '['];

/// A voter resolved to a display name, for the voter list.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedVote {
    pub name: String,
    pub weight: f64,
}

pub fn render_poll(poll: &PublishedPoll, tally: &VoteTally, now: DateTime<Utc>) -> String {
    let header = format!("**Poll #{}: {}**", poll.id, bold_safe(&poll.content.question));
    render_with_header(&header, &poll.content, tally, now)
}

pub fn render_preview(content: &PollContent, now: DateTime<Utc>) -> String {
    let header = format!("**Preview: {}**", bold_safe(&content.question));
    let tally = VoteTally::empty(content.options.len());
    render_with_header(&header, content, &tally, now)
}

fn render_with_header(
    header: &str,
    content: &PollContent,
    tally: &VoteTally,
    now: DateTime<Utc>,
) -> String {
    let total = tally.total_weight();
    let mut text = String::new();
    let _ = write!(text, "{header}\n\n");

    if let Some(description) = content.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = write!(text, "{}\n\n", escape_markdown(description));
    }

    for (index, option) in content.options.iter().enumerate() {
        let weight = tally.weights.get(index).copied().unwrap_or(0.0);
        let _ = write!(
            text,
            "{}) {}\n▫️{}\n\n",
            option_label(index),
            escape_markdown(option),
            format_percent(weight, total)
        );
    }

    if content.has_expired(now) {
        text.push_str("Poll has already ended.\n\n");
    } else {
        let _ = write!(
            text,
            "Poll ends on {}\n\n",
            content.expires_at.format(END_FORMAT)
        );
    }

    if let Some(weighting) = &content.weighting {
        let _ = writeln!(
            text,
            "This poll is weighted by \"{}\" on \"{}\".",
            escape_markdown(&weighting.name),
            escape_markdown(&weighting.chain)
        );
    }

    let voters = tally.distinct_voters();
    let noun = if voters == 1 { "person" } else { "people" };
    let _ = write!(text, "👥 {voters} {noun} voted so far.");
    text
}

/// Private summary sent for "List Voters". `voters[i]` belongs to option `i`.
pub fn render_voter_list(
    content: &PollContent,
    tally: &VoteTally,
    voters: &[Vec<NamedVote>],
) -> String {
    let total = tally.total_weight();
    let mut text = String::from("Results:\n");
    for (index, option) in content.options.iter().enumerate() {
        let weight = tally.weights.get(index).copied().unwrap_or(0.0);
        let count = tally.voters.get(index).copied().unwrap_or(0);
        let _ = writeln!(
            text,
            "\n▫️ {} - {} ({count})",
            escape_markdown(option),
            format_percent(weight, total)
        );
        for vote in voters.get(index).map(Vec::as_slice).unwrap_or_default() {
            let _ = writeln!(
                text,
                "{} {}",
                escape_markdown(&vote.name),
                format_weight(vote.weight)
            );
        }
    }
    text
}

/// Escapes user supplied text for Telegram's legacy Markdown. Only valid
/// outside of an entity.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Reverses [`escape_markdown`].
pub fn unescape_markdown(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|next| MARKDOWN_SPECIAL.contains(next)) {
            continue;
        }
        plain.push(c);
    }
    plain
}

/// Inside a bold span everything is literal up to the closing `*`, which
/// can't be escaped there.
fn bold_safe(text: &str) -> String {
    text.replace('*', "∗")
}

/// One vote button per option, each bound to the admin message.
pub fn vote_keyboard(poll_id: PollId, options: &[String], admin: MessageRef) -> Keyboard {
    options
        .iter()
        .enumerate()
        .map(|(option_index, option)| {
            let payload = CallbackPayload::Vote {
                option_index,
                poll_id,
                admin,
            };
            vec![Button::new(option.as_str(), payload.to_string())]
        })
        .collect()
}

/// "List Voters" and "Update Result", both bound to the public message.
pub fn admin_keyboard(poll_id: PollId, public: MessageRef) -> Keyboard {
    let list = CallbackPayload::ListVoters { public, poll_id };
    let update = CallbackPayload::UpdateResult { public, poll_id };
    vec![vec![
        Button::new("List Voters", list.to_string()),
        Button::new("Update Result", update.to_string()),
    ]]
}

/// `a`..`z`, then `aa`, `ab`, ...
pub fn option_label(index: usize) -> String {
    let mut label = Vec::new();
    let mut remaining = index + 1;
    while remaining > 0 {
        remaining -= 1;
        label.push(b'a' + (remaining % 26) as u8);
        remaining /= 26;
    }
    label.reverse();
    String::from_utf8(label).unwrap_or_default()
}

/// `0%` for an option without weight, two decimals otherwise.
pub fn format_percent(weight: f64, total: f64) -> String {
    if weight <= 0.0 {
        return "0%".to_string();
    }
    let percent = weight / total.max(1.0) * 100.0;
    format!("{percent:.2}%")
}

fn format_weight(weight: f64) -> String {
    if weight.fract() == 0.0 {
        format!("{weight:.0}")
    } else {
        format!("{weight}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::poll::{PollResult, PollVoters, Weighting};
    use crate::platform::{ChatId, MessageId};
    use chrono::TimeZone;

    fn poll(options: &[&str]) -> PublishedPoll {
        PublishedPoll {
            id: PollId(7),
            requirement_id: 3,
            content: PollContent {
                question: "Favourite colour?".to_string(),
                description: None,
                options: options.iter().map(|o| o.to_string()).collect(),
                expires_at: Utc.with_ymd_and_hms(2030, 5, 1, 18, 30, 0).unwrap(),
                weighting: None,
            },
        }
    }

    fn before_end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 4, 1, 0, 0, 0).unwrap()
    }

    fn tally(poll: &PublishedPoll, weights: &[(&str, f64)]) -> VoteTally {
        let result: PollResult = weights.iter().map(|(o, w)| (o.to_string(), *w)).collect();
        VoteTally::from_backend(&poll.content.options, &result, &PollVoters::new())
    }

    #[test]
    fn zero_tally_renders_every_option_at_zero() {
        let poll = poll(&["Red", "Blue"]);
        let text = render_poll(&poll, &VoteTally::empty(2), before_end());
        assert_eq!(
            text,
            "**Poll #7: Favourite colour?**\n\n\
             a) Red\n▫️0%\n\n\
             b) Blue\n▫️0%\n\n\
             Poll ends on 2030-05-01 18:30 UTC\n\n\
             👥 0 people voted so far."
        );
    }

    #[test]
    fn weighted_tally_renders_two_decimal_percentages() {
        let poll = poll(&["Red", "Blue"]);
        let text = render_poll(&poll, &tally(&poll, &[("Red", 3.0), ("Blue", 1.0)]), before_end());
        assert!(text.contains("a) Red\n▫️75.00%"));
        assert!(text.contains("b) Blue\n▫️25.00%"));
    }

    #[test]
    fn rendering_is_deterministic_and_keeps_option_order() {
        let poll = poll(&["Low", "High"]);
        let tally = tally(&poll, &[("Low", 1.0), ("High", 9.0)]);
        let first = render_poll(&poll, &tally, before_end());
        let second = render_poll(&poll, &tally, before_end());
        assert_eq!(first, second);
        assert!(first.find("a) Low").unwrap() < first.find("b) High").unwrap());
    }

    #[test]
    fn percentages_never_exceed_one_hundred() {
        let poll = poll(&["A", "B", "C"]);
        let tally = tally(&poll, &[("A", 1.0), ("B", 1.0), ("C", 1.0)]);
        let sum: f64 = (0..3)
            .map(|i| {
                format_percent(tally.weights[i], tally.total_weight())
                    .trim_end_matches('%')
                    .parse::<f64>()
                    .unwrap()
            })
            .sum();
        assert!(sum <= 100.0 + 1e-9, "sum was {sum}");
    }

    #[test]
    fn expired_poll_with_description_and_weighting() {
        let mut poll = poll(&["Yes", "No"]);
        poll.content.description = Some("Decide today.".to_string());
        poll.content.weighting = Some(Weighting {
            name: "MILK".to_string(),
            chain: "POLYGON".to_string(),
        });
        let after_end = Utc.with_ymd_and_hms(2030, 5, 1, 18, 30, 0).unwrap();
        let text = render_poll(&poll, &VoteTally::empty(2), after_end);
        assert!(text.starts_with("**Poll #7: Favourite colour?**\n\nDecide today.\n\na) Yes"));
        assert!(text.contains("Poll has already ended.\n\n"));
        assert!(text.ends_with(
            "This poll is weighted by \"MILK\" on \"POLYGON\".\n👥 0 people voted so far."
        ));
    }

    #[test]
    fn user_text_is_escaped_outside_the_bold_header() {
        let mut poll = poll(&["snake_case", "[camel]Case", "`code`"]);
        poll.content.question = "snake_case or *camelCase*?".to_string();
        poll.content.description = Some("Pick one_only".to_string());
        let text = render_poll(&poll, &VoteTally::empty(3), before_end());

        assert!(text.starts_with("**Poll #7: snake_case or ∗camelCase∗?**\n\nPick one\\_only\n\n"));
        assert!(text.contains("a) snake\\_case\n"));
        assert!(text.contains("b) \\[camel]Case\n"));
        assert!(text.contains("c) \\`code\\`\n"));
    }

    #[test]
    fn escaping_round_trips_to_the_displayed_text() {
        let raw = r"a_b *c* [d] `e` \f";
        assert_eq!(unescape_markdown(&escape_markdown(raw)), raw);
    }

    #[test]
    fn option_labels_continue_past_z() {
        assert_eq!(option_label(0), "a");
        assert_eq!(option_label(25), "z");
        assert_eq!(option_label(26), "aa");
        assert_eq!(option_label(27), "ab");
    }

    #[test]
    fn keyboards_encode_bindings() {
        let poll = poll(&["Red", "Blue"]);
        let admin = MessageRef::new(ChatId(11), MessageId(5));
        let public = MessageRef::new(ChatId(-100), MessageId(9));

        let votes = vote_keyboard(poll.id, &poll.content.options, admin);
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[1][0].text, "Blue");
        assert_eq!(votes[1][0].callback_data, "1;7;11:5;Vote");

        let controls = admin_keyboard(poll.id, public);
        assert_eq!(controls[0][0].callback_data, "-100:9;7;ListVoters");
        assert_eq!(controls[0][1].callback_data, "-100:9;7;UpdateResult");
    }

    #[test]
    fn voter_list_names_each_voter_under_their_option() {
        let poll = poll(&["Red", "Blue"]);
        let tally = tally(&poll, &[("Red", 3.0), ("Blue", 0.0)]);
        let voters = vec![
            vec![
                NamedVote {
                    name: "Ann".to_string(),
                    weight: 2.0,
                },
                NamedVote {
                    name: UNKNOWN_VOTER.to_string(),
                    weight: 1.5,
                },
            ],
            Vec::new(),
        ];
        let text = render_voter_list(&poll.content, &tally, &voters);
        assert_eq!(
            text,
            "Results:\n\n▫️ Red - 100.00% (0)\nAnn 2\nUnknown\\_User 1.5\n\n▫️ Blue - 0% (0)\n"
        );
    }
}
