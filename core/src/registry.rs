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

//! Library discovery: builds the `id -> name` registry from whichever
//! endpoint the server supports, and widens it on demand through `/Items`.

use crate::client::MediaApi;
use crate::models::{Library, Partial, Warning};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const VIRTUAL_FOLDERS_PATH: &str = "/Library/VirtualFolders";
pub const MEDIA_FOLDERS_PATH: &str = "/Library/MediaFolders";
pub const ITEMS_PATH: &str = "/Items";

/// Maximum number of IDs sent in one `/Items?Ids=` lookup.
pub const WIDEN_BATCH_SIZE: usize = 50;

/// Field names some server versions wrap the virtual folder list in.
const CONTAINER_FIELDS: [&str; 3] = ["Items", "VirtualFolders", "ItemsList"];

type SourceParser = fn(&Value) -> Option<Vec<(String, String)>>;

/// Discovery endpoints in priority order. A later source is only queried
/// while the registry is still empty.
const SOURCES: [(&str, SourceParser); 2] = [
    (VIRTUAL_FOLDERS_PATH, parse_virtual_folders),
    (MEDIA_FOLDERS_PATH, parse_media_folders),
];

/// Append-only `library id -> name` mapping. Once an ID is resolved its
/// name never changes for the rest of the run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LibraryRegistry {
    names: BTreeMap<String, String>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.names.contains_key(id)
    }

    /// Fills a gap in the registry. Returns false if `id` was already
    /// resolved or either value is empty.
    pub fn insert(&mut self, id: impl Into<String>, name: impl Into<String>) -> bool {
        let (id, name) = (id.into(), name.into());
        if id.is_empty() || name.is_empty() || self.names.contains_key(&id) {
            return false;
        }
        self.names.insert(id, name);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// Every library, sorted by name (case-insensitive), then ID.
    pub fn libraries_by_name(&self) -> Vec<Library> {
        let mut libraries: Vec<Library> = self
            .iter()
            .map(|(id, name)| Library {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        libraries.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        libraries
    }
}

impl<I: Into<String>, N: Into<String>> Extend<(I, N)> for LibraryRegistry {
    fn extend<T: IntoIterator<Item = (I, N)>>(&mut self, iter: T) {
        for (id, name) in iter {
            self.insert(id, name);
        }
    }
}

impl<I: Into<String>, N: Into<String>> FromIterator<(I, N)> for LibraryRegistry {
    fn from_iter<T: IntoIterator<Item = (I, N)>>(iter: T) -> Self {
        let mut registry = Self::new();
        registry.extend(iter);
        registry
    }
}

/// Reads a non-empty string (or number) field.
fn text_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses `/Library/VirtualFolders`.
///
/// Accepts a bare array of folders or an object wrapping one. Each folder
/// contributes its `ItemId` (or `Id`), and every ID in
/// `LibraryOptions.ItemIds` maps to the same name. Returns `None` when no
/// folder list can be found.
pub fn parse_virtual_folders(body: &Value) -> Option<Vec<(String, String)>> {
    let folders = match body {
        Value::Array(folders) => folders,
        Value::Object(map) => {
            let lists: Vec<&Vec<Value>> = CONTAINER_FIELDS
                .iter()
                .filter_map(|key| map.get(*key)?.as_array())
                .collect();
            // An empty wrapper is a valid, empty answer.
            let first = *lists.first()?;
            lists.into_iter().find(|l| !l.is_empty()).unwrap_or(first)
        }
        _ => return None,
    };

    let mut entries = Vec::new();
    for folder in folders.iter().filter(|f| f.is_object()) {
        let Some(name) = text_field(folder, "Name") else {
            continue;
        };
        if let Some(id) = text_field(folder, "ItemId").or_else(|| text_field(folder, "Id")) {
            entries.push((id, name.clone()));
        }
        let backing_ids = folder
            .get("LibraryOptions")
            .and_then(|opts| opts.get("ItemIds"))
            .and_then(Value::as_array);
        for id in backing_ids.into_iter().flatten() {
            if let Some(id) = id.as_str().filter(|s| !s.is_empty()) {
                entries.push((id.to_string(), name.clone()));
            }
        }
    }
    Some(entries)
}

/// Parses `/Library/MediaFolders` (`{"Items": [{"Id", "Name"}]}`).
pub fn parse_media_folders(body: &Value) -> Option<Vec<(String, String)>> {
    let items = body.get("Items")?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|it| Some((text_field(it, "Id")?, text_field(it, "Name")?)))
            .collect(),
    )
}

/// Builds the registry from the first discovery source that yields any
/// library. Source failures are recorded as warnings, never returned as errors.
pub async fn discover<A: MediaApi + ?Sized>(api: &A) -> Partial<LibraryRegistry> {
    let mut result = Partial::new(LibraryRegistry::new());

    for (endpoint, parse) in SOURCES {
        if !result.value.is_empty() {
            break;
        }
        match api.get(endpoint, &[]).await {
            Ok(body) => match parse(&body) {
                Some(entries) => {
                    debug!("{} listed {} library IDs", endpoint, entries.len());
                    result.value.extend(entries);
                }
                None => {
                    warn!("{} returned an unexpected shape", endpoint);
                    result.warn(Warning::UnexpectedShape {
                        endpoint: endpoint.to_string(),
                    });
                }
            },
            Err(e) => {
                warn!("{} failed: {}", endpoint, e);
                result.warn(Warning::SourceFailed {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    result
}

/// Resolves IDs missing from the registry through `/Items?Ids=`, in batches
/// of [`WIDEN_BATCH_SIZE`]. A failed batch is skipped and its IDs stay
/// unresolved. Returns how many IDs were newly resolved.
pub async fn widen<A: MediaApi + ?Sized>(
    api: &A,
    registry: &mut LibraryRegistry,
    ids: &[String],
) -> Partial<usize> {
    let mut missing: Vec<&str> = Vec::new();
    for id in ids {
        if !id.is_empty() && !registry.contains(id) && !missing.contains(&id.as_str()) {
            missing.push(id.as_str());
        }
    }

    let mut result = Partial::new(0);
    for batch in missing.chunks(WIDEN_BATCH_SIZE) {
        let joined = batch.join(",");
        let failure = match api.get(ITEMS_PATH, &[("Ids", joined.as_str())]).await {
            Ok(body) => match body.get("Items").and_then(Value::as_array) {
                Some(items) => {
                    for item in items {
                        if let (Some(id), Some(name)) = (text_field(item, "Id"), text_field(item, "Name")) {
                            if registry.insert(id, name) {
                                result.value += 1;
                            }
                        }
                    }
                    None
                }
                None => Some("unexpected response shape".to_string()),
            },
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            warn!("ID lookup for {} libraries failed: {}", batch.len(), reason);
            result.warn(Warning::WidenBatchFailed {
                ids: batch.iter().map(|id| id.to_string()).collect(),
                reason,
            });
        }
    }

    result
}
