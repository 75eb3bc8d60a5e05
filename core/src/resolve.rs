/*
    jellyfin-library-access | Rust CLI tool to audit and grant library access.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::models::Library;
use crate::registry::LibraryRegistry;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Library '{input}' not found ({known} libraries known)")]
    NotFound { input: String, known: usize },
    #[error("Library '{input}' is ambiguous: {} libraries match; use the exact ID", .matches.len())]
    Ambiguous { input: String, matches: Vec<Library> },
}

type Matcher = fn(input: &str, id: &str, name: &str) -> bool;

fn same_id(input: &str, id: &str, _name: &str) -> bool {
    id == input
}

fn same_name(input: &str, _id: &str, name: &str) -> bool {
    name.to_lowercase() == input.to_lowercase()
}

fn name_contains(input: &str, _id: &str, name: &str) -> bool {
    name.to_lowercase().contains(&input.to_lowercase())
}

/// Match tiers, tried in order until one yields anything. An ID hit always
/// wins over a name hit, and an exact name over a substring.
const TIERS: [(&str, Matcher); 3] = [
    ("id", same_id),
    ("name", same_name),
    ("substring", name_contains),
];

fn matches(registry: &LibraryRegistry, input: &str, matcher: Matcher) -> Vec<Library> {
    registry
        .iter()
        .filter(|(id, name)| matcher(input, id, name))
        .map(|(id, name)| Library {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}

/// Resolves a user-supplied library reference (ID, exact name or part of a
/// name) to exactly one library.
pub fn resolve_target(registry: &LibraryRegistry, input: &str) -> Result<Library, ResolveError> {
    let input = input.trim();
    if !input.is_empty() {
        for (tier, matcher) in TIERS {
            let mut found = matches(registry, input, matcher);
            match found.len() {
                0 => continue,
                1 => {
                    debug!("'{}' resolved by {} match", input, tier);
                    return Ok(found.remove(0));
                }
                _ => {
                    return Err(ResolveError::Ambiguous {
                        input: input.to_string(),
                        matches: found,
                    })
                }
            }
        }
    }

    Err(ResolveError::NotFound {
        input: input.to_string(),
        known: registry.len(),
    })
}
