//! Entry display formatting
//!
//! Formats staged entries, suggestions and transfer candidates for terminal
//! output.

use std::collections::BTreeMap;

use crate::models::{EntryId, JournalEntry};
use crate::services::{Suggestion, TransferCandidate};

const DESCRIPTION_WIDTH: usize = 32;

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn state(entry: &JournalEntry) -> String {
    match (entry.posted, entry.is_transfer) {
        (None, _) => "unposted".to_string(),
        (Some(_), true) => "transfer".to_string(),
        (Some(_), false) if entry.is_split() => {
            let posted = entry.splits.iter().filter(|s| s.posted).count();
            format!("posted {}/{}", posted, entry.splits.len())
        }
        (Some(_), false) => "posted".to_string(),
    }
}

/// Format an account's entries as a table
pub fn format_entry_list(entries: &[&JournalEntry]) -> String {
    if entries.is_empty() {
        return "No entries found.\n".to_string();
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<8}  {:<10}  {:<7}  {:<w$}  {:>12}  {}\n",
        "ID",
        "Date",
        "Status",
        "Description",
        "Amount",
        "State",
        w = DESCRIPTION_WIDTH,
    ));
    output.push_str(&format!(
        "{:-<8}  {:-<10}  {:-<7}  {:-<w$}  {:->12}  {:-<10}\n",
        "",
        "",
        "",
        "",
        "",
        "",
        w = DESCRIPTION_WIDTH,
    ));

    for entry in entries {
        output.push_str(&format!(
            "{:<8}  {:<10}  {:<7}  {:<w$}  {:>12}  {}\n",
            entry.id.short(),
            entry.date.format("%Y-%m-%d").to_string(),
            entry.status.to_string(),
            clip(&entry.description, DESCRIPTION_WIDTH),
            entry.amount.to_string(),
            state(entry),
            w = DESCRIPTION_WIDTH,
        ));
    }

    let unposted = entries.iter().filter(|e| !e.is_posted()).count();
    output.push_str(&format!("\n{} entries, {} unposted\n", entries.len(), unposted));
    output
}

/// Format suggestions next to the entries they belong to
pub fn format_suggestions(
    entries: &[JournalEntry],
    suggestions: &BTreeMap<EntryId, Suggestion>,
) -> String {
    let mut output = String::new();
    for entry in entries {
        let Some(suggestion) = suggestions.get(&entry.id) else {
            continue;
        };

        let advice = if let Some(matched) = &suggestion.transfer_match {
            format!(
                "transfer with {} {} ({})",
                matched.account,
                matched.entry_id.short(),
                matched.matched_amount
            )
        } else if suggestion.is_drifted() {
            let mut changed = Vec::new();
            if suggestion.amount_changed {
                changed.push("amount");
            }
            if suggestion.status_changed {
                changed.push("status");
            }
            format!("drifted: {} changed, run sync", changed.join(" and "))
        } else if let Some(account) = &suggestion.suggested {
            format!("-> {}", account)
        } else if entry.is_posted() {
            continue;
        } else {
            "no suggestion".to_string()
        };

        output.push_str(&format!(
            "{:<8}  {:<10}  {:>12}  {:<w$}  {}\n",
            entry.id.short(),
            entry.date.format("%Y-%m-%d").to_string(),
            entry.amount.to_string(),
            clip(&entry.description, DESCRIPTION_WIDTH),
            advice,
            w = DESCRIPTION_WIDTH,
        ));
    }

    if output.is_empty() {
        output.push_str("Nothing to suggest.\n");
    }
    output
}

/// Format transfer candidates in ranked order
pub fn format_candidates(candidates: &[TransferCandidate]) -> String {
    if candidates.is_empty() {
        return "No transfer candidates.\n".to_string();
    }

    candidates
        .iter()
        .enumerate()
        .map(|(rank, c)| {
            format!(
                "{:>2}. {:<24}  {}  {}  {:>12}  {}\n",
                rank + 1,
                c.account.to_string(),
                c.entry.id.short(),
                c.entry.date.format("%Y-%m-%d"),
                c.entry.amount.to_string(),
                clip(&c.entry.description, DESCRIPTION_WIDTH),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountLocator, EvidenceRef, GlTransactionId, Money};
    use crate::services::TransferMatch;
    use chrono::NaiveDate;

    fn entry(row: usize, cents: i64, description: &str) -> JournalEntry {
        let account = AccountLocator::new("chase", "checking");
        let evidence = vec![EvidenceRef::row("jan.csv", row)];
        JournalEntry::new(
            EntryId::derive(&account, &evidence),
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            Money::from_cents(cents),
            description,
            evidence,
        )
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(format_entry_list(&[]), "No entries found.\n");
    }

    #[test]
    fn test_entry_list_rows() {
        let unposted = entry(1, -450, "COFFEE");
        let mut posted = entry(2, -6000, "A VERY LONG MERCHANT DESCRIPTION THAT KEEPS GOING");
        posted.posted = Some(GlTransactionId::new());

        let output = format_entry_list(&[&unposted, &posted]);
        assert!(output.contains(unposted.id.short()));
        assert!(output.contains("-4.50"));
        assert!(output.contains("unposted"));
        assert!(output.contains("A VERY LONG MERCHANT DESCRIPT..."));
        assert!(output.contains("2 entries, 1 unposted"));
    }

    #[test]
    fn test_suggestions_prefer_transfer_match() {
        let e = entry(1, -1234, "XFER");
        let mut suggestions = BTreeMap::new();
        suggestions.insert(
            e.id.clone(),
            Suggestion {
                suggested: Some("Expenses:Misc".into()),
                transfer_match: Some(TransferMatch {
                    account: AccountLocator::new("ally", "savings"),
                    entry_id: e.id.clone(),
                    matched_amount: Money::from_cents(1234),
                }),
                ..Suggestion::default()
            },
        );

        let output = format_suggestions(std::slice::from_ref(&e), &suggestions);
        assert!(output.contains("transfer with ally/savings"));
        assert!(!output.contains("Expenses:Misc"));
    }
}
