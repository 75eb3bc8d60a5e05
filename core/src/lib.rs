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

pub mod audit;
pub mod client;
pub mod models;
pub mod policy;
pub mod reconcile;
pub mod registry;
pub mod resolve;

#[cfg(test)]
pub(crate) mod fake;

// Re-export key items for convenience
pub use audit::{AuditError, Auditor};
pub use client::{ApiError, MediaApi, MediaServerClient, ServerConfig};
pub use models::{AccessMode, AuditReport, AuditRow, GrantReport, GrantStatus, Library, User, Warning};
pub use resolve::ResolveError;
