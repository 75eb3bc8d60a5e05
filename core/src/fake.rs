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

//! In-memory media server used by the unit tests.

use crate::client::{ApiError, MediaApi};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    routes: HashMap<String, Result<Value, u16>>,
    items: HashMap<String, String>,
    items_status: Option<u16>,
    put_status: Option<u16>,
    post_status: Option<u16>,
    requests: Vec<String>,
    writes: Vec<(String, String, Value)>,
}

#[derive(Default)]
pub(crate) struct FakeServer {
    state: Mutex<State>,
}

fn status_error(path: &str, status: u16) -> ApiError {
    ApiError::Status {
        status,
        path: path.to_string(),
        message: "fake".to_string(),
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(self, path: &str, body: Value) -> Self {
        self.lock().routes.insert(path.to_string(), Ok(body));
        self
    }

    pub fn with_failing_route(self, path: &str, status: u16) -> Self {
        self.lock().routes.insert(path.to_string(), Err(status));
        self
    }

    /// Registers an item resolvable through `GET /Items?Ids=...`.
    pub fn with_item(self, id: &str, name: &str) -> Self {
        self.lock().items.insert(id.to_string(), name.to_string());
        self
    }

    pub fn with_failing_items(self, status: u16) -> Self {
        self.lock().items_status = Some(status);
        self
    }

    pub fn rejecting_put(self, status: u16) -> Self {
        self.lock().put_status = Some(status);
        self
    }

    pub fn rejecting_post(self, status: u16) -> Self {
        self.lock().post_status = Some(status);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// `(method, path, body)` of every accepted write.
    pub fn writes(&self) -> Vec<(String, String, Value)> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake server state poisoned")
    }

    fn write(&self, method: &str, path: &str, body: &Value) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.requests.push(format!("{} {}", method, path));
        let rejected = match method {
            "PUT" => state.put_status,
            _ => state.post_status,
        };
        if let Some(status) = rejected {
            return Err(status_error(path, status));
        }
        state.routes.insert(path.to_string(), Ok(body.clone()));
        state
            .writes
            .push((method.to_string(), path.to_string(), body.clone()));
        Ok(json!({}))
    }
}

#[async_trait]
impl MediaApi for FakeServer {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let mut state = self.lock();
        let rendered: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        if rendered.is_empty() {
            state.requests.push(format!("GET {}", path));
        } else {
            state
                .requests
                .push(format!("GET {}?{}", path, rendered.join("&")));
        }

        if path == "/Items" {
            if let Some(status) = state.items_status {
                return Err(status_error(path, status));
            }
            let ids = query
                .iter()
                .find(|(k, _)| *k == "Ids")
                .map(|(_, v)| *v)
                .unwrap_or_default();
            let items: Vec<Value> = ids
                .split(',')
                .filter_map(|id| {
                    state
                        .items
                        .get(id)
                        .map(|name| json!({"Id": id, "Name": name}))
                })
                .collect();
            return Ok(json!({ "Items": items }));
        }

        match state.routes.get(path) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(status)) => Err(status_error(path, *status)),
            None => Err(status_error(path, 404)),
        }
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.write("PUT", path, body)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.write("POST", path, body)
    }
}
