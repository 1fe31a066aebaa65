// Copyright 2020 The Matrix.org Foundation C.I.C.
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

use ruma::{canonical_json::to_canonical_value, CanonicalJsonValue};
use serde::Serialize;

use crate::error::CryptoError;

/// Convert an object into the canonical JSON string that gets signed.
///
/// The `signatures` and `unsigned` fields are not covered by signatures and
/// are removed before canonicalization.
pub(crate) fn canonical_json_for_signing<T: Serialize>(object: &T) -> Result<String, CryptoError> {
    let CanonicalJsonValue::Object(mut object) = to_canonical_value(object)? else {
        return Err(CryptoError::NotAnObject);
    };

    object.remove("signatures");
    object.remove("unsigned");

    Ok(CanonicalJsonValue::Object(object).to_string())
}
