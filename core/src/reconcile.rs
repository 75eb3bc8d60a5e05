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
    AccessPolicy, GrantOutcome, GrantReport, GrantStatus, Library, ReconciliationDecision, User,
    Warning,
};
use crate::policy::{fetch_policy, policy_path};
use log::{debug, info, warn};

const UNREADABLE_POLICY: &str = "current policy could not be read";

/// HTTP verb that a policy write finally went through with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    Put,
    Post,
}

/// Classifies one user's policy against the target library.
pub fn decide(policy: &AccessPolicy, target_id: &str) -> ReconciliationDecision {
    if policy.enable_all_folders() {
        ReconciliationDecision::AlreadyHasAll
    } else if policy.allows(target_id) {
        ReconciliationDecision::AlreadyHasTarget
    } else {
        ReconciliationDecision::NeedsGrant
    }
}

/// Writes a user's policy with PUT, retrying once with POST on the same
/// path and body if the server answers 405.
pub async fn write_policy<A: MediaApi + ?Sized>(
    api: &A,
    user_id: &str,
    policy: &AccessPolicy,
) -> Result<WriteMethod, ApiError> {
    let path = policy_path(user_id);
    let body = policy.to_value();

    match api.put(&path, &body).await {
        Ok(_) => Ok(WriteMethod::Put),
        Err(e) if e.is_method_not_allowed() => {
            warn!("PUT not allowed on {}, retrying with POST", path);
            api.post(&path, &body).await?;
            Ok(WriteMethod::Post)
        }
        Err(e) => Err(e),
    }
}

/// Grants `target` to every user lacking it.
///
/// With `apply` false nothing is written and users needing the grant are
/// reported as [`GrantStatus::Planned`], or [`GrantStatus::Blocked`] when
/// their current policy could not be read. A failed write is recorded on that
/// user's outcome and processing continues. Re-running after a successful
/// apply finds every user in `AlreadyHasTarget` or `AlreadyHasAll`.
pub async fn grant_library<A: MediaApi + ?Sized>(
    api: &A,
    users: &[User],
    target: &Library,
    apply: bool,
) -> GrantReport {
    let mut report = GrantReport::new(target.clone(), apply);

    for user in users {
        let fetched = fetch_policy(api, &user.id).await;
        let policy_readable = !fetched.is_degraded();
        let (policy, warnings) = fetched.into_parts();
        report.warnings.extend(warnings);

        let decision = decide(&policy, &target.id);
        debug!("{}: {:?}", user, decision);

        let status = match decision {
            ReconciliationDecision::NeedsGrant => {
                info!("{} -> add {}", user, target);
                let updated = policy.with_folder(&target.id);

                if !policy_readable {
                    // Writing a policy we never read would reset every other field.
                    let reason = UNREADABLE_POLICY.to_string();
                    if apply {
                        warn!("Skipping {}: {}", user, reason);
                        report.warnings.push(Warning::PolicyWriteFailed {
                            user: user.to_string(),
                            reason: reason.clone(),
                        });
                        GrantStatus::Failed(reason)
                    } else {
                        GrantStatus::Blocked(reason)
                    }
                } else if !apply {
                    GrantStatus::Planned
                } else {
                    match write_policy(api, &user.id, &updated).await {
                        Ok(WriteMethod::Put) => GrantStatus::Granted,
                        Ok(WriteMethod::Post) => GrantStatus::GrantedViaPost,
                        Err(e) => {
                            warn!("Failed to update {}: {}", user, e);
                            report.warnings.push(Warning::PolicyWriteFailed {
                                user: user.to_string(),
                                reason: e.to_string(),
                            });
                            GrantStatus::Failed(e.to_string())
                        }
                    }
                }
            }
            _ => GrantStatus::Unchanged,
        };

        report.outcomes.push(GrantOutcome {
            user: user.clone(),
            decision,
            status,
        });
    }

    report
}
