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
use crate::models::{AccessPolicy, Partial, User, Warning};
use log::debug;
use serde_json::Value;

pub const USERS_PATH: &str = "/Users";

pub fn user_path(user_id: &str) -> String {
    format!("{}/{}", USERS_PATH, user_id)
}

pub fn policy_path(user_id: &str) -> String {
    format!("{}/{}/Policy", USERS_PATH, user_id)
}

/// Lists users in server order. Accepts a bare array or `{"Items": [...]}`;
/// records without both `Id` and `Name` are dropped.
pub async fn fetch_users<A: MediaApi + ?Sized>(api: &A) -> Result<Vec<User>, ApiError> {
    let body = api.get(USERS_PATH, &[]).await?;
    let records = match &body {
        Value::Array(records) => records.as_slice(),
        Value::Object(map) => map
            .get("Items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    let users = records
        .iter()
        .filter_map(|record| {
            let id = record.get("Id")?.as_str().filter(|s| !s.is_empty())?;
            let name = record.get("Name")?.as_str().filter(|s| !s.is_empty())?;
            Some(User {
                id: id.to_string(),
                name: name.to_string(),
            })
        })
        .collect();
    Ok(users)
}

fn non_empty_object(value: Value) -> Option<AccessPolicy> {
    match value {
        Value::Object(map) if !map.is_empty() => Some(AccessPolicy::from_map(map)),
        _ => None,
    }
}

/// Fetches a user's policy from `/Users/{id}/Policy`, falling back to the
/// `Policy` field of `/Users/{id}`.
///
/// When neither works the policy is empty (no explicit access, not
/// allow-all) and a warning says why.
pub async fn fetch_policy<A: MediaApi + ?Sized>(api: &A, user_id: &str) -> Partial<AccessPolicy> {
    match api.get(&policy_path(user_id), &[]).await {
        Ok(body) => {
            if let Some(policy) = non_empty_object(body) {
                return Partial::new(policy);
            }
            debug!("empty policy endpoint for user {}, trying user record", user_id);
        }
        Err(e) => debug!("policy endpoint failed for user {}: {}", user_id, e),
    }

    let reason = match api.get(&user_path(user_id), &[]).await {
        Ok(mut record) => match record.get_mut("Policy").map(Value::take).and_then(non_empty_object) {
            Some(policy) => return Partial::new(policy),
            None => "user record has no Policy object".to_string(),
        },
        Err(e) => e.to_string(),
    };

    let mut result = Partial::new(AccessPolicy::new());
    result.warn(Warning::PolicyUnavailable {
        user_id: user_id.to_string(),
        reason,
    });
    result
}
