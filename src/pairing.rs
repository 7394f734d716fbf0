use std::{
    collections::{BTreeSet, HashSet},
    io::{Cursor, Read},
    time::Duration,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::common::{error::MusigError, utils::now_millis};

#[derive(
    Clone, Copy, Debug, Display, EnumString, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Read = 1,
    Write = 2,
    Trade = 3,
    Admin = 4,
}

impl Permission {
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Result<Self, MusigError> {
        match id {
            1 => Ok(Permission::Read),
            2 => Ok(Permission::Write),
            3 => Ok(Permission::Trade),
            4 => Ok(Permission::Admin),
            _ => Err(MusigError::Codec(format!("Unknown permission id {}", id))),
        }
    }
}

/// Grants a paired client a set of permissions until it expires.
///
/// Binary layout, all integers big endian:
/// `version: u8 | id length: u16 | id: UTF-8 | expires at (ms since epoch): u64 |
/// permission count: u8 | permission ids: u8, strictly ascending`
///
/// Permissions are always written in ascending id order, so two codes with the same
/// permission set encode identically no matter how the set was built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingCode {
    pub version: u8,
    pub id: String,
    pub expires_at_millis: u64,
    pub permissions: HashSet<Permission>,
}

impl PairingCode {
    pub const VERSION: u8 = 1;

    pub fn new(
        id: impl Into<String>,
        expires_at_millis: u64,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            version: Self::VERSION,
            id: id.into(),
            expires_at_millis,
            permissions: permissions.into_iter().collect(),
        }
    }

    /// Fresh code with a random id, valid for `validity` from now.
    pub fn generate(validity: Duration, permissions: impl IntoIterator<Item = Permission>) -> Self {
        let expires_at_millis = now_millis().saturating_add(validity.as_millis() as u64);
        Self::new(Uuid::new_v4().to_string(), expires_at_millis, permissions)
    }

    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expires_at_millis
    }

    pub fn encode(&self) -> Result<Vec<u8>, MusigError> {
        let id_bytes = self.id.as_bytes();
        let id_len = u16::try_from(id_bytes.len())
            .map_err(|_| MusigError::Codec(format!("Id of {} bytes too long", id_bytes.len())))?;
        let sorted: BTreeSet<Permission> = self.permissions.iter().copied().collect();
        let count = u8::try_from(sorted.len())
            .map_err(|_| MusigError::Codec("Too many permissions".to_string()))?;

        let mut bytes = Vec::with_capacity(1 + 2 + id_bytes.len() + 8 + 1 + sorted.len());
        bytes.write_u8(self.version)?;
        bytes.write_u16::<BigEndian>(id_len)?;
        bytes.extend_from_slice(id_bytes);
        bytes.write_u64::<BigEndian>(self.expires_at_millis)?;
        bytes.write_u8(count)?;
        for permission in sorted {
            bytes.write_u8(permission.id())?;
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MusigError> {
        let mut cursor = Cursor::new(bytes);

        let version = cursor.read_u8().map_err(truncated)?;
        if version != Self::VERSION {
            return Err(MusigError::Codec(format!(
                "Unsupported pairing code version {}",
                version
            )));
        }

        let id_len = cursor.read_u16::<BigEndian>().map_err(truncated)? as usize;
        let mut id_bytes = vec![0u8; id_len];
        cursor.read_exact(&mut id_bytes).map_err(truncated)?;
        let id = String::from_utf8(id_bytes)
            .map_err(|error| MusigError::Codec(format!("Id is not UTF-8 - {}", error)))?;

        let expires_at_millis = cursor.read_u64::<BigEndian>().map_err(truncated)?;

        let count = cursor.read_u8().map_err(truncated)?;
        let mut permissions = HashSet::with_capacity(count as usize);
        let mut previous_id: Option<u8> = None;
        for _ in 0..count {
            let permission_id = cursor.read_u8().map_err(truncated)?;
            if let Some(previous_id) = previous_id {
                if permission_id <= previous_id {
                    return Err(MusigError::Codec(
                        "Permission ids not in strictly ascending order".to_string(),
                    ));
                }
            }
            previous_id = Some(permission_id);
            permissions.insert(Permission::from_id(permission_id)?);
        }

        if (cursor.position() as usize) != bytes.len() {
            return Err(MusigError::Codec(format!(
                "{} trailing bytes after pairing code",
                bytes.len() - cursor.position() as usize
            )));
        }

        Ok(Self {
            version,
            id,
            expires_at_millis,
            permissions,
        })
    }

    pub fn to_base64(&self) -> Result<String, MusigError> {
        Ok(URL_SAFE_NO_PAD.encode(self.encode()?))
    }

    pub fn from_base64(text: &str) -> Result<Self, MusigError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|error| MusigError::Codec(format!("Invalid base64 - {}", error)))?;
        Self::decode(&bytes)
    }
}

fn truncated(error: std::io::Error) -> MusigError {
    MusigError::Codec(format!("Truncated pairing code - {}", error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_encode_ascending_regardless_of_insertion_order() {
        let read_first = PairingCode::new("abc", 1_700_000_000_000, [Permission::Read, Permission::Write]);
        let write_first = PairingCode::new("abc", 1_700_000_000_000, [Permission::Write, Permission::Read]);

        let bytes = read_first.encode().unwrap();
        assert_eq!(bytes, write_first.encode().unwrap());

        let expected: Vec<u8> = [
            vec![1u8, 0, 3],
            b"abc".to_vec(),
            1_700_000_000_000u64.to_be_bytes().to_vec(),
            vec![2, 1, 2],
        ]
        .concat();
        assert_eq!(bytes, expected);

        let decoded = PairingCode::decode(&bytes).unwrap();
        assert_eq!(decoded, read_first);
        assert_eq!(
            decoded.permissions,
            HashSet::from([Permission::Read, Permission::Write])
        );
    }

    #[test]
    fn test_base64_text_form() {
        let code = PairingCode::new("abc", 42, [Permission::Trade]);
        let text = code.to_base64().unwrap();
        assert!(!text.contains('='));
        assert_eq!(PairingCode::from_base64(&text).unwrap(), code);
    }

    #[test]
    fn test_out_of_order_permissions_rejected() {
        let mut bytes = PairingCode::new("abc", 42, [Permission::Read, Permission::Write])
            .encode()
            .unwrap();
        let len = bytes.len();
        bytes.swap(len - 1, len - 2);
        assert!(matches!(
            PairingCode::decode(&bytes),
            Err(MusigError::Codec(_))
        ));
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        let bytes = PairingCode::new("abc", 42, [Permission::Admin]).encode().unwrap();

        let mut unknown_version = bytes.clone();
        unknown_version[0] = 9;
        assert!(matches!(
            PairingCode::decode(&unknown_version),
            Err(MusigError::Codec(_))
        ));

        assert!(matches!(
            PairingCode::decode(&bytes[..bytes.len() - 1]),
            Err(MusigError::Codec(_))
        ));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(
            PairingCode::decode(&trailing),
            Err(MusigError::Codec(_))
        ));

        let mut unknown_permission = bytes;
        let len = unknown_permission.len();
        unknown_permission[len - 1] = 7;
        assert!(matches!(
            PairingCode::decode(&unknown_permission),
            Err(MusigError::Codec(_))
        ));
    }

    #[test]
    fn test_generated_code_expiry() {
        let code = PairingCode::generate(Duration::from_secs(300), [Permission::Read]);
        assert!(!code.is_expired());
        assert_eq!(code.version, PairingCode::VERSION);

        let expired = PairingCode::new("old", 1, [Permission::Read]);
        assert!(expired.is_expired());
    }
}
