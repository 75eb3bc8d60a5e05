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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Policy flag granting implicit access to every library.
pub const ENABLE_ALL_FOLDERS: &str = "EnableAllFolders";

/// Both historical spellings of the folder allow-list. Reads take the first
/// non-empty one, writes keep both in sync.
pub const FOLDER_FIELDS: [&str; 2] = ["EnabledFolders", "EnabledFolderIds"];

/// A top-level library (virtual folder). `name` is not guaranteed unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.id, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A user's access policy as returned by the server.
///
/// The full JSON object is kept so that a write sends back every field the
/// server gave us, not only the ones this tool understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessPolicy {
    raw: Map<String, Value>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.raw.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn enable_all_folders(&self) -> bool {
        self.raw.get(ENABLE_ALL_FOLDERS).is_some_and(is_truthy)
    }

    /// The explicit allow-list, read from the first non-empty legacy field.
    pub fn enabled_folder_ids(&self) -> Vec<String> {
        FOLDER_FIELDS
            .iter()
            .filter_map(|key| self.raw.get(*key))
            .find(|v| is_truthy(v))
            .map(normalize_id_list)
            .unwrap_or_default()
    }

    pub fn allows(&self, library_id: &str) -> bool {
        self.enabled_folder_ids().iter().any(|id| id == library_id)
    }

    /// Returns a shallow copy with `library_id` appended to both legacy fields.
    ///
    /// Existing entries keep their order and are deduplicated; the new ID goes last.
    pub fn with_folder(&self, library_id: &str) -> AccessPolicy {
        let mut raw = self.raw.clone();
        for key in FOLDER_FIELDS {
            let mut ids: Vec<String> = Vec::new();
            for id in raw.get(key).map(normalize_id_list).unwrap_or_default() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            if !ids.iter().any(|id| id == library_id) {
                ids.push(library_id.to_string());
            }
            raw.insert(
                key.to_string(),
                Value::Array(ids.into_iter().map(Value::String).collect()),
            );
        }
        AccessPolicy { raw }
    }
}

impl From<Map<String, Value>> for AccessPolicy {
    fn from(raw: Map<String, Value>) -> Self {
        Self::from_map(raw)
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Coerces an allow-list value into string IDs. Non-arrays become empty,
/// falsy entries are dropped and the rest are stringified.
pub fn normalize_id_list(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|v| is_truthy(v))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// What the reconciler concluded for one user and one target library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationDecision {
    AlreadyHasAll,
    AlreadyHasTarget,
    NeedsGrant,
}

/// Result of acting on a [`ReconciliationDecision`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantStatus {
    /// No write needed.
    Unchanged,
    /// Dry-run: the write was computed but not sent.
    Planned,
    /// Dry-run: a grant is needed but apply will refuse it.
    Blocked(String),
    Granted,
    /// Granted after the server refused PUT and accepted POST.
    GrantedViaPost,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantOutcome {
    pub user: User,
    pub decision: ReconciliationDecision,
    pub status: GrantStatus,
}

/// Run-level result of granting one library to every user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantReport {
    pub target: Library,
    pub applied: bool,
    pub outcomes: Vec<GrantOutcome>,
    pub warnings: Vec<Warning>,
}

impl GrantReport {
    pub fn new(target: Library, applied: bool) -> Self {
        Self {
            target,
            applied,
            outcomes: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn count(&self, pred: impl Fn(&GrantOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    pub fn needs_grant(&self) -> usize {
        self.count(|o| o.decision == ReconciliationDecision::NeedsGrant)
    }

    pub fn granted(&self) -> usize {
        self.count(|o| matches!(o.status, GrantStatus::Granted | GrantStatus::GrantedViaPost))
    }

    pub fn would_grant(&self) -> usize {
        self.count(|o| o.status == GrantStatus::Planned)
    }

    pub fn blocked(&self) -> usize {
        self.count(|o| matches!(o.status, GrantStatus::Blocked(_)))
    }

    pub fn skipped_all(&self) -> usize {
        self.count(|o| o.decision == ReconciliationDecision::AlreadyHasAll)
    }

    pub fn already_has_target(&self) -> usize {
        self.count(|o| o.decision == ReconciliationDecision::AlreadyHasTarget)
    }

    pub fn errors(&self) -> usize {
        self.count(|o| matches!(o.status, GrantStatus::Failed(_)))
    }
}

impl fmt::Display for GrantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.applied {
            write!(
                f,
                "Applied: {} updated, {} skipped (EnableAllFolders=true), {} already had access, {} errors.",
                self.granted(),
                self.skipped_all(),
                self.already_has_target(),
                self.errors()
            )
        } else {
            write!(
                f,
                "Dry-run: {} users would be updated, {} skipped (EnableAllFolders=true), {} already had access",
                self.would_grant(),
                self.skipped_all(),
                self.already_has_target()
            )?;
            if self.blocked() > 0 {
                write!(f, ", {} cannot be updated (policy unreadable)", self.blocked())?;
            }
            write!(f, ". Use --apply to write the changes.")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMode {
    All,
    Custom,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::All => f.write_str("ALL"),
            AccessMode::Custom => f.write_str("CUSTOM"),
        }
    }
}

/// One user's resolved library access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub user: String,
    pub mode: AccessMode,
    /// Deduplicated, sorted case-insensitively.
    pub library_names: Vec<String>,
    pub unresolved_ids: BTreeSet<String>,
}

impl AuditRow {
    /// Display form of the library column.
    pub fn libraries_label(&self) -> String {
        if !self.library_names.is_empty() {
            self.library_names.join(", ")
        } else if self.mode == AccessMode::All {
            "(undetermined)".to_string()
        } else {
            "(none)".to_string()
        }
    }
}

impl fmt::Display for AuditRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.user, self.mode, self.libraries_label())
    }
}

/// Audit of every user, in the order the server listed them.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub rows: Vec<AuditRow>,
    pub unresolved_ids: BTreeSet<String>,
    pub warnings: Vec<Warning>,
}

impl AuditReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, row: AuditRow) {
        self.unresolved_ids.extend(row.unresolved_ids.iter().cloned());
        self.rows.push(row);
    }

    /// Rows sorted by user name, case-insensitively, for display.
    pub fn sorted_rows(&self) -> Vec<&AuditRow> {
        let mut rows: Vec<&AuditRow> = self.rows.iter().collect();
        rows.sort_by_key(|r| r.user.to_lowercase());
        rows
    }
}

/// A degraded but non-fatal condition met during a run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Warning {
    #[error("Library source {endpoint} failed: {reason}")]
    SourceFailed { endpoint: String, reason: String },
    #[error("Library source {endpoint} returned an unexpected shape")]
    UnexpectedShape { endpoint: String },
    #[error("Could not resolve {} library IDs via /Items: {reason}", .ids.len())]
    WidenBatchFailed { ids: Vec<String>, reason: String },
    #[error("No policy available for user {user_id}: {reason}")]
    PolicyUnavailable { user_id: String, reason: String },
    #[error("Failed to update policy for {user}: {reason}")]
    PolicyWriteFailed { user: String, reason: String },
}

/// A value that may be incomplete, with the reasons it is.
#[derive(Debug, Clone, PartialEq)]
pub struct Partial<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Partial<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_parts(self) -> (T, Vec<Warning>) {
        (self.value, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(value: Value) -> AccessPolicy {
        match value {
            Value::Object(map) => AccessPolicy::from_map(map),
            _ => panic!("policy fixture must be an object"),
        }
    }

    #[test]
    fn test_enabled_folders_first_non_empty_field_wins() {
        let p = policy(json!({"EnabledFolders": [], "EnabledFolderIds": ["a", "b"]}));
        assert_eq!(p.enabled_folder_ids(), vec!["a", "b"]);

        let p = policy(json!({"EnabledFolders": ["x"], "EnabledFolderIds": ["a"]}));
        assert_eq!(p.enabled_folder_ids(), vec!["x"]);
    }

    #[test]
    fn test_enabled_folders_normalization() {
        let p = policy(json!({"EnabledFolders": ["a", "", null, 7, 0, false]}));
        assert_eq!(p.enabled_folder_ids(), vec!["a", "7"]);

        let p = policy(json!({"EnabledFolders": "not-a-list"}));
        assert!(p.enabled_folder_ids().is_empty());

        assert!(AccessPolicy::new().enabled_folder_ids().is_empty());
    }

    #[test]
    fn test_enable_all_folders_truthiness() {
        assert!(policy(json!({"EnableAllFolders": true})).enable_all_folders());
        assert!(!policy(json!({"EnableAllFolders": false})).enable_all_folders());
        assert!(!policy(json!({"EnableAllFolders": null})).enable_all_folders());
        assert!(!AccessPolicy::new().enable_all_folders());
    }

    #[test]
    fn test_with_folder_updates_both_fields_and_keeps_others() {
        let p = policy(json!({
            "IsAdministrator": false,
            "EnableAllFolders": false,
            "EnabledFolders": ["L1", "L1", "L3"]
        }));

        let updated = p.with_folder("L2");
        let map = updated.as_map();
        assert_eq!(map["EnabledFolders"], json!(["L1", "L3", "L2"]));
        assert_eq!(map["EnabledFolderIds"], json!(["L2"]));
        assert_eq!(map["IsAdministrator"], json!(false));
        assert!(updated.allows("L2"));

        // The source policy is untouched.
        assert!(!p.allows("L2"));
    }

    #[test]
    fn test_with_folder_does_not_duplicate_existing_id() {
        let p = policy(json!({"EnabledFolders": ["L1"], "EnabledFolderIds": ["L1"]}));
        let updated = p.with_folder("L1");
        assert_eq!(updated.as_map()["EnabledFolders"], json!(["L1"]));
        assert_eq!(updated.as_map()["EnabledFolderIds"], json!(["L1"]));
    }

    #[test]
    fn test_audit_row_labels() {
        let mut row = AuditRow {
            user: "alice".to_string(),
            mode: AccessMode::Custom,
            library_names: vec![],
            unresolved_ids: BTreeSet::new(),
        };
        assert_eq!(row.libraries_label(), "(none)");

        row.mode = AccessMode::All;
        assert_eq!(row.libraries_label(), "(undetermined)");

        row.library_names = vec!["Kids".to_string(), "Movies".to_string()];
        assert_eq!(row.libraries_label(), "Kids, Movies");
        assert_eq!(format!("{}", row), "alice [ALL] Kids, Movies");
    }

    #[test]
    fn test_audit_report_aggregates_unresolved_ids() {
        let mut report = AuditReport::new();
        for (user, missing) in [("bob", "X1"), ("Alice", "X2"), ("carol", "X1")] {
            report.add_row(AuditRow {
                user: user.to_string(),
                mode: AccessMode::Custom,
                library_names: vec![],
                unresolved_ids: BTreeSet::from([missing.to_string()]),
            });
        }

        assert_eq!(report.unresolved_ids.len(), 2);
        let order: Vec<&str> = report.sorted_rows().iter().map(|r| r.user.as_str()).collect();
        assert_eq!(order, vec!["Alice", "bob", "carol"]);
        // Processing order is preserved in the rows themselves.
        assert_eq!(report.rows[0].user, "bob");
    }

    #[test]
    fn test_grant_report_summary() {
        let user = |id: &str| User {
            id: id.to_string(),
            name: id.to_string(),
        };
        let mut report = GrantReport::new(
            Library {
                id: "L2".to_string(),
                name: "Movies".to_string(),
            },
            false,
        );
        report.outcomes.push(GrantOutcome {
            user: user("u1"),
            decision: ReconciliationDecision::NeedsGrant,
            status: GrantStatus::Planned,
        });
        report.outcomes.push(GrantOutcome {
            user: user("u2"),
            decision: ReconciliationDecision::AlreadyHasAll,
            status: GrantStatus::Unchanged,
        });

        assert_eq!(report.would_grant(), 1);
        assert_eq!(report.skipped_all(), 1);
        assert_eq!(report.granted(), 0);
        assert!(report.to_string().starts_with("Dry-run: 1 users would be updated, 1 skipped"));
        assert!(!report.to_string().contains("cannot be updated"));

        report.outcomes.push(GrantOutcome {
            user: user("u3"),
            decision: ReconciliationDecision::NeedsGrant,
            status: GrantStatus::Blocked("current policy could not be read".to_string()),
        });
        assert_eq!(report.would_grant(), 1);
        assert_eq!(report.blocked(), 1);
        assert!(report.to_string().contains("1 cannot be updated (policy unreadable)"));
    }
}
