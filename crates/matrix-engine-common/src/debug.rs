// Copyright 2023 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Helpers for writing compact and secret-free `Debug` implementations.

use std::fmt;

/// An extension trait for [`fmt::DebugStruct`].
pub trait DebugStructExt<'a, 'b> {
    /// Add a field to the debug output only if it is `Some`.
    fn maybe_field<T: fmt::Debug>(&mut self, name: &str, value: &Option<T>) -> &mut Self;
}

impl<'a, 'b: 'a> DebugStructExt<'a, 'b> for fmt::DebugStruct<'a, 'b> {
    fn maybe_field<T: fmt::Debug>(&mut self, name: &str, value: &Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.field(name, value);
        }

        self
    }
}

/// Wrapper that prints a placeholder instead of a secret value.
pub struct Redacted;

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}
