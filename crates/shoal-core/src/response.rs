//! The result envelope shared by every engine operation.
//!
//! Operations report failure through `status` alone; no error codes cross
//! this boundary. `data` is present on `OK` results that carry a value.

use serde::{Deserialize, Serialize};

/// Binary operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// Envelope returned by every engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Response<T> {
    /// Successful result carrying a value.
    pub fn ok(data: T) -> Self {
        Self {
            status: Status::Ok,
            data: Some(data),
        }
    }

    /// Successful result with no value.
    pub fn ok_empty() -> Self {
        Self {
            status: Status::Ok,
            data: None,
        }
    }

    /// Failed result. No further context crosses this boundary.
    pub fn error() -> Self {
        Self {
            status: Status::Error,
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    /// Consume the envelope, yielding the payload of an `OK` result.
    pub fn into_data(self) -> Option<T> {
        match self.status {
            Status::Ok => self.data,
            Status::Error => None,
        }
    }

    /// Map the payload, preserving the status.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            data: self.data.map(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_carries_data() {
        let r = Response::ok(7u64);
        assert!(r.is_ok());
        assert_eq!(r.into_data(), Some(7));
    }

    #[test]
    fn test_error_drops_data() {
        let r: Response<u64> = Response::error();
        assert!(r.is_error());
        assert_eq!(r.into_data(), None);
    }

    #[test]
    fn test_status_wire_spelling() {
        let ok = serde_json::to_string(&Response::ok(1u32)).unwrap();
        assert!(ok.contains("\"OK\""));

        let err = serde_json::to_string(&Response::<u32>::error()).unwrap();
        assert!(err.contains("\"ERROR\""));
        assert!(!err.contains("data"));
    }

    #[test]
    fn test_roundtrip_msgpack() {
        let r = Response::ok(vec![1u64, 2, 3]);
        let bytes = rmp_serde::to_vec_named(&r).unwrap();
        let back: Response<Vec<u64>> = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn test_map_preserves_status() {
        let r = Response::ok(2u32).map(|n| n * 10);
        assert_eq!(r.into_data(), Some(20));

        let e: Response<u32> = Response::error();
        assert!(e.map(|n| n + 1).is_error());
    }
}
