use anyhow::Result;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::app::types::{Choice, MenuItem};
use crate::console::Console;

const HINTS: &[&str] = &["[#] select", "[text] filter", "[/] clear", "[enter] back", "[q] quit"];
const TOP_HINTS: &[&str] = &["[#] select", "[text] filter", "[/] clear", "[enter/q] quit"];

/// Indices of `keys` matching `query`, case-insensitively.
///
/// Keys starting with the query come first, then keys that contain it or
/// contain its characters in order. Input order is kept within each group.
pub fn fuzzy_filter<'a, I>(query: &str, keys: I) -> Vec<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let query = query.to_lowercase();
    let matcher = SkimMatcherV2::default().ignore_case();

    let mut prefix = Vec::new();
    let mut rest = Vec::new();
    for (i, key) in keys.into_iter().enumerate() {
        let key = key.to_lowercase();
        if key.starts_with(&query) {
            prefix.push(i);
        } else if key.contains(&query) || matcher.fuzzy_match(&key, &query).is_some() {
            rest.push(i);
        }
    }

    prefix.extend(rest);
    prefix
}

/// Prompt until the operator picks an item, backs out or quits.
///
/// At the top level an empty answer quits instead of going back.
pub async fn select(
    console: &dyn Console,
    title: &str,
    items: &[MenuItem],
    top_level: bool,
) -> Result<Choice> {
    let all: Vec<usize> = (0..items.len()).collect();
    let mut visible = all.clone();
    let mut filter: Option<String> = None;
    let hints = if top_level { TOP_HINTS } else { HINTS };

    loop {
        let labels: Vec<String> = visible.iter().map(|&i| items[i].label.clone()).collect();
        console.menu(title, filter.as_deref(), &labels, hints);

        let Some(input) = console.read_line("Select:").await? else {
            return Ok(Choice::Exit);
        };

        match input.as_str() {
            "" if top_level => return Ok(Choice::Exit),
            "" => return Ok(Choice::Back),
            "q" | "Q" => return Ok(Choice::Exit),
            "/" => {
                visible = all.clone();
                filter = None;
            }
            text => {
                if text.bytes().all(|b| b.is_ascii_digit()) {
                    let picked = text
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| visible.get(i));
                    match picked {
                        Some(&index) => return Ok(Choice::Selected(index)),
                        None => console.error(&format!(
                            "Invalid selection: {}. Choose 1-{}.",
                            text,
                            visible.len()
                        )),
                    }
                    continue;
                }

                let matches = fuzzy_filter(text, items.iter().map(|item| item.key.as_str()));
                if matches.is_empty() {
                    console.warn(&format!("No matches for '{}'", text));
                    visible = all.clone();
                    filter = None;
                } else {
                    tracing::debug!("Filter '{}' matched {} item(s)", text, matches.len());
                    visible = matches;
                    filter = Some(text.to_string());
                }
            }
        }
    }
}
