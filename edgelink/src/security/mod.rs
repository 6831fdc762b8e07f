//! Security object: per-server credential instances and their repository.
//!
//! Each [`SecurityInstance`] holds the connection credentials for one
//! management server (or for the bootstrap server). Instances are mutated
//! field-by-field by the data-model write path as remote write operations
//! arrive; every remotely writable field is therefore an `Option`, so
//! "explicitly set" is distinguishable from "never written". Consistency
//! is only enforced at transaction commit time, through the transaction
//! methods on [`SecurityObject`].

mod transaction;

use tracing::warn;

use crate::error::ObjectError;

/// Short Server ID: small integer uniquely identifying a management server
/// within the device's configuration.
pub type Ssid = u16;

/// UDP (DTLS) security mode, with LwM2M wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpSecurityMode {
    PreSharedKey,
    RawPublicKey,
    Certificate,
    NoSec,
}

impl UdpSecurityMode {
    /// Decodes the wire value carried by a resource write.
    pub fn from_raw(raw: i64) -> Result<Self, ObjectError> {
        match raw {
            0 => Ok(Self::PreSharedKey),
            1 => Ok(Self::RawPublicKey),
            2 => Ok(Self::Certificate),
            3 => Ok(Self::NoSec),
            _ => {
                warn!(raw, "unknown UDP security mode");
                Err(ObjectError::BadRequest)
            }
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::PreSharedKey => 0,
            Self::RawPublicKey => 1,
            Self::Certificate => 2,
            Self::NoSec => 3,
        }
    }

    /// Raw Public Key is a recognized wire value this agent does not
    /// implement.
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::RawPublicKey)
    }
}

/// SMS security mode, with LwM2M wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsSecurityMode {
    DtlsPsk,
    SecurePacket,
    NoSec,
}

impl SmsSecurityMode {
    /// Decodes the wire value carried by a resource write.
    pub fn from_raw(raw: i64) -> Result<Self, ObjectError> {
        match raw {
            1 => Ok(Self::DtlsPsk),
            2 => Ok(Self::SecurePacket),
            3 => Ok(Self::NoSec),
            _ => {
                warn!(raw, "unknown SMS security mode");
                Err(ObjectError::BadRequest)
            }
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::DtlsPsk => 1,
            Self::SecurePacket => 2,
            Self::NoSec => 3,
        }
    }

    /// True for modes that need SMS key material to operate.
    pub fn requires_key_material(self) -> bool {
        matches!(self, Self::DtlsPsk | Self::SecurePacket)
    }
}

/// One security-configuration instance.
///
/// Identity is positional within [`SecurityObject`]'s ordered list. The
/// data-model write path mutates fields directly (or through the validated
/// setters below); nothing here is checked until validation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityInstance {
    pub server_uri: Option<String>,
    pub bootstrap: Option<bool>,
    pub ssid: Option<Ssid>,
    pub udp_security_mode: Option<UdpSecurityMode>,
    pub sms_security_mode: Option<SmsSecurityMode>,
    /// Public certificate or PSK identity, depending on the mode.
    pub public_cert_or_psk_identity: Option<Vec<u8>>,
    /// Private key or PSK key, depending on the mode.
    pub private_cert_or_psk_key: Option<Vec<u8>>,
    pub server_public_key: Option<Vec<u8>>,
    pub sms_key_params: Option<Vec<u8>>,
    pub sms_secret_key: Option<Vec<u8>>,
}

impl SecurityInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and stores a UDP security mode from its wire value.
    /// Unsupported values are rejected without mutating the instance.
    pub fn set_udp_security_mode(&mut self, raw: i64) -> Result<(), ObjectError> {
        let mode = UdpSecurityMode::from_raw(raw)?;
        if !mode.is_supported() {
            warn!(raw, "UDP security mode not supported");
            return Err(ObjectError::BadRequest);
        }
        self.udp_security_mode = Some(mode);
        Ok(())
    }

    /// Decodes and stores an SMS security mode from its wire value.
    pub fn set_sms_security_mode(&mut self, raw: i64) -> Result<(), ObjectError> {
        self.sms_security_mode = Some(SmsSecurityMode::from_raw(raw)?);
        Ok(())
    }

    /// Decodes and stores a Short Server ID from its wire value. 0 and
    /// 65535 are reserved.
    pub fn set_ssid(&mut self, raw: i64) -> Result<(), ObjectError> {
        match u16::try_from(raw) {
            Ok(ssid) if ssid != 0 && ssid != u16::MAX => {
                self.ssid = Some(ssid);
                Ok(())
            }
            _ => {
                warn!(raw, "short server ID out of range");
                Err(ObjectError::BadRequest)
            }
        }
    }

    /// True when this instance is the bootstrap-server instance.
    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap == Some(true)
    }
}

/// Repository of security instances with transactional update semantics.
///
/// The live list is mutated incrementally as resource writes arrive; a
/// shadow copy taken at [`SecurityObject::transaction_begin`] is the only
/// correct rollback point, since any single write may fail mid-sequence.
/// The shadow list exists only between `begin` and `commit`/`rollback`.
#[derive(Debug, Default)]
pub struct SecurityObject {
    instances: Vec<SecurityInstance>,
    saved_instances: Option<Vec<SecurityInstance>>,
    modified_since_persist: bool,
    saved_modified_since_persist: bool,
}

impl SecurityObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ordered instance list; position is instance identity.
    pub fn instances(&self) -> &[SecurityInstance] {
        &self.instances
    }

    /// Mutable access for the data-model write path. Changes become
    /// authoritative at commit and are discarded by rollback.
    pub fn instances_mut(&mut self) -> &mut Vec<SecurityInstance> {
        &mut self.instances
    }

    /// Appends an instance, returning its positional index.
    pub fn add_instance(&mut self, instance: SecurityInstance) -> usize {
        self.instances.push(instance);
        self.mark_modified();
        self.instances.len() - 1
    }

    /// Removes the instance at `index`, or reports `BadRequest` when the
    /// index does not name an instance.
    pub fn remove_instance(&mut self, index: usize) -> Result<SecurityInstance, ObjectError> {
        if index >= self.instances.len() {
            return Err(ObjectError::BadRequest);
        }
        self.mark_modified();
        Ok(self.instances.remove(index))
    }

    /// True while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.saved_instances.is_some()
    }

    /// Flags the repository as changed relative to its persisted form.
    pub fn mark_modified(&mut self) {
        self.modified_since_persist = true;
    }

    /// Clears the dirty flag, e.g. after the caller persisted the state.
    pub fn clear_modified(&mut self) {
        self.modified_since_persist = false;
    }

    pub fn is_modified(&self) -> bool {
        self.modified_since_persist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_security_mode_wire_values() {
        assert_eq!(
            UdpSecurityMode::from_raw(0),
            Ok(UdpSecurityMode::PreSharedKey)
        );
        assert_eq!(UdpSecurityMode::from_raw(3), Ok(UdpSecurityMode::NoSec));
        assert_eq!(UdpSecurityMode::from_raw(4), Err(ObjectError::BadRequest));
        assert_eq!(UdpSecurityMode::from_raw(-1), Err(ObjectError::BadRequest));
        assert_eq!(UdpSecurityMode::Certificate.as_raw(), 2);
    }

    #[test]
    fn test_set_udp_security_mode_rejects_unsupported() {
        let mut instance = SecurityInstance::new();
        // Raw Public Key parses but is not supported.
        assert_eq!(
            instance.set_udp_security_mode(1),
            Err(ObjectError::BadRequest)
        );
        assert_eq!(instance.udp_security_mode, None);

        assert_eq!(instance.set_udp_security_mode(0), Ok(()));
        assert_eq!(
            instance.udp_security_mode,
            Some(UdpSecurityMode::PreSharedKey)
        );
    }

    #[test]
    fn test_set_sms_security_mode() {
        let mut instance = SecurityInstance::new();
        assert_eq!(instance.set_sms_security_mode(0), Err(ObjectError::BadRequest));
        assert_eq!(instance.sms_security_mode, None);

        assert_eq!(instance.set_sms_security_mode(2), Ok(()));
        assert_eq!(
            instance.sms_security_mode,
            Some(SmsSecurityMode::SecurePacket)
        );
        assert!(SmsSecurityMode::SecurePacket.requires_key_material());
        assert!(!SmsSecurityMode::NoSec.requires_key_material());
    }

    #[test]
    fn test_set_ssid_rejects_reserved_values() {
        let mut instance = SecurityInstance::new();
        assert_eq!(instance.set_ssid(0), Err(ObjectError::BadRequest));
        assert_eq!(instance.set_ssid(65535), Err(ObjectError::BadRequest));
        assert_eq!(instance.set_ssid(65536), Err(ObjectError::BadRequest));
        assert_eq!(instance.set_ssid(-3), Err(ObjectError::BadRequest));
        assert_eq!(instance.ssid, None);

        assert_eq!(instance.set_ssid(42), Ok(()));
        assert_eq!(instance.ssid, Some(42));
    }

    #[test]
    fn test_add_and_remove_instances_touch_dirty_flag() {
        let mut object = SecurityObject::new();
        assert!(!object.is_modified());

        let index = object.add_instance(SecurityInstance::new());
        assert_eq!(index, 0);
        assert!(object.is_modified());

        object.clear_modified();
        assert!(object.remove_instance(0).is_ok());
        assert!(object.is_modified());
        assert_eq!(
            object.remove_instance(0),
            Err(ObjectError::BadRequest)
        );
    }
}
