// Copyright 2024 The Dx9mt Developers.
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

//! Event/occlusion/timestamp queries.
//!
//! The recorder has no GPU to wait on, so issued queries complete
//! immediately with benign answers (event signaled, one sample visible).
//! Programs that spin on query results keep making progress.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use handle::{ObjectId, ObjectKind, PrivateData, Resource};
use {D3dResult, Error};

/// Raw D3D query type code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct QueryType(pub u32);

impl QueryType {
    pub const EVENT: QueryType = QueryType(8);
    pub const OCCLUSION: QueryType = QueryType(9);
    pub const TIMESTAMP: QueryType = QueryType(10);
    pub const TIMESTAMP_DISJOINT: QueryType = QueryType(11);
    pub const TIMESTAMP_FREQ: QueryType = QueryType(12);

    /// Size of the result payload in bytes; 0 for types without data.
    pub fn data_size(self) -> u32 {
        match self {
            QueryType::EVENT | QueryType::OCCLUSION => 4,
            QueryType::TIMESTAMP | QueryType::TIMESTAMP_DISJOINT | QueryType::TIMESTAMP_FREQ => 8,
            _ => 0,
        }
    }
}

pub struct Query {
    object_id: ObjectId,
    device_id: u32,
    query_type: QueryType,
    data_size: u32,
    issued: AtomicBool,
    issue_flags: AtomicU32,
    private: PrivateData,
}

impl Query {
    pub fn new(device_id: u32, query_type: QueryType) -> Query {
        Query {
            object_id: ObjectId::alloc(ObjectKind::Query),
            device_id: device_id,
            query_type: query_type,
            data_size: query_type.data_size(),
            issued: AtomicBool::new(false),
            issue_flags: AtomicU32::new(0),
            private: PrivateData::new(),
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    pub fn issue(&self, flags: u32) {
        self.issue_flags.store(flags, Ordering::Relaxed);
        self.issued.store(true, Ordering::Release);
    }

    /// Fetch the result. `Ok(false)` means the query was never issued
    /// (still pending from the caller's point of view).
    pub fn get_data(&self, data: &mut [u8]) -> D3dResult<bool> {
        if !self.issued.load(Ordering::Acquire) {
            return Ok(false);
        }

        if self.data_size != 0 && (data.len() as u32) < self.data_size {
            return Err(Error::InvalidCall);
        }

        if self.data_size != 0 {
            let payload = &mut data[..self.data_size as usize];
            for byte in payload.iter_mut() {
                *byte = 0;
            }
            if self.query_type == QueryType::EVENT || self.query_type == QueryType::OCCLUSION {
                payload[..4].copy_from_slice(&1u32.to_le_bytes());
            }
        }

        Ok(true)
    }
}

impl Resource for Query {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Query
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unissued_queries_report_pending() {
        let query = Query::new(1, QueryType::EVENT);
        let mut out = [0u8; 4];
        assert_eq!(query.get_data(&mut out), Ok(false));
    }

    #[test]
    fn issued_event_reads_back_signaled() {
        let query = Query::new(1, QueryType::EVENT);
        query.issue(0);
        let mut out = [0xFFu8; 4];
        assert_eq!(query.get_data(&mut out), Ok(true));
        assert_eq!(u32::from_le_bytes(out), 1);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let query = Query::new(1, QueryType::TIMESTAMP);
        query.issue(0);
        let mut out = [0u8; 4];
        assert_eq!(query.get_data(&mut out), Err(Error::InvalidCall));
        let mut full = [0xAAu8; 8];
        assert_eq!(query.get_data(&mut full), Ok(true));
        assert_eq!(full, [0u8; 8]);
    }

    #[test]
    fn unknown_types_have_no_payload() {
        let query = Query::new(1, QueryType(3));
        query.issue(0);
        assert_eq!(query.data_size(), 0);
        assert_eq!(query.get_data(&mut []), Ok(true));
    }
}
