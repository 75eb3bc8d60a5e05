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

use crate::client::{ApiError, MediaApi};
use crate::models::{
    AccessMode, AuditReport, AuditRow, GrantReport, Library, User, Warning,
};
use crate::policy::{fetch_policy, fetch_users};
use crate::reconcile::grant_library;
use crate::registry::{discover, widen, LibraryRegistry};
use crate::resolve::{resolve_target, ResolveError};
use log::{debug, info};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Media server API error: {0}")]
    Api(#[from] ApiError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Runs audits and grants against one media server.
///
/// Owns the run's library registry, the set of library IDs that could not
/// be resolved, and every warning raised along the way.
pub struct Auditor<A: MediaApi> {
    api: A,
    registry: LibraryRegistry,
    unresolved: BTreeSet<String>,
    warnings: Vec<Warning>,
}

impl<A: MediaApi> Auditor<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            registry: LibraryRegistry::new(),
            unresolved: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn registry(&self) -> &LibraryRegistry {
        &self.registry
    }

    /// Library IDs seen in user policies that no source could name.
    pub fn unresolved_ids(&self) -> &BTreeSet<String> {
        &self.unresolved
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AuditError> {
        Ok(fetch_users(&self.api).await?)
    }

    /// Populates the registry from the discovery endpoints. Gaps found later
    /// are filled by widening, never by rediscovery.
    pub async fn discover_libraries(&mut self) -> &LibraryRegistry {
        let (found, warnings) = discover(&self.api).await.into_parts();
        self.registry.extend(found.iter());
        self.warnings.extend(warnings);
        info!("Discovered {} library IDs", self.registry.len());
        &self.registry
    }

    /// All known libraries, sorted by name.
    pub fn list_libraries(&self) -> Vec<Library> {
        self.registry.libraries_by_name()
    }

    pub fn resolve_target(&self, input: &str) -> Result<Library, AuditError> {
        Ok(resolve_target(&self.registry, input)?)
    }

    pub async fn grant(&mut self, target: &Library, users: &[User], apply: bool) -> GrantReport {
        let report = grant_library(&self.api, users, target, apply).await;
        self.warnings.extend(report.warnings.iter().cloned());
        report
    }

    /// Resolves the libraries one user can see.
    ///
    /// Allow-all users get the whole registry, which is only as complete as
    /// discovery managed to make it. IDs from an explicit allow-list that the
    /// registry lacks are looked up before being reported unresolved.
    pub async fn audit_user(&mut self, user: &User) -> AuditRow {
        let (policy, warnings) = fetch_policy(&self.api, &user.id).await.into_parts();
        self.warnings.extend(warnings);

        let (mode, ids): (AccessMode, BTreeSet<String>) = if policy.enable_all_folders() {
            (AccessMode::All, self.registry.ids().map(str::to_string).collect())
        } else {
            (AccessMode::Custom, policy.enabled_folder_ids().into_iter().collect())
        };

        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !self.registry.contains(id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!("{} references {} unknown library IDs", user, missing.len());
            let (_, warnings) = widen(&self.api, &mut self.registry, &missing)
                .await
                .into_parts();
            self.warnings.extend(warnings);
        }

        let mut names: BTreeSet<String> = BTreeSet::new();
        let mut unresolved: BTreeSet<String> = BTreeSet::new();
        for id in ids {
            match self.registry.get(&id) {
                Some(name) => {
                    names.insert(name.to_string());
                }
                None => {
                    unresolved.insert(id);
                }
            }
        }
        let mut library_names: Vec<String> = names.into_iter().collect();
        library_names.sort_by_key(|name| name.to_lowercase());

        self.unresolved.extend(unresolved.iter().cloned());
        AuditRow {
            user: user.name.clone(),
            mode,
            library_names,
            unresolved_ids: unresolved,
        }
    }

    /// Audits every user in the given order.
    pub async fn audit_users(&mut self, users: &[User]) -> AuditReport {
        let first_warning = self.warnings.len();
        let mut report = AuditReport::new();
        for user in users {
            let row = self.audit_user(user).await;
            report.add_row(row);
        }
        report.warnings = self.warnings[first_warning..].to_vec();
        report
    }
}
