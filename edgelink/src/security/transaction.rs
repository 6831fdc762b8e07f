//! Transactional update semantics for the security object.
//!
//! Remote writes mutate the live instance list incrementally as individual
//! resource-write operations arrive. Validation has to see the complete
//! proposed state, and any single write may fail mid-sequence, so the only
//! correct rollback point is the state before the first write, hence a
//! deep clone at `begin` rather than an undo log.
//!
//! State machine: `IDLE → OPEN → {VALIDATING → COMMITTED | VALIDATING →
//! ROLLED_BACK}`, with `IDLE` reachable directly from both terminal states.

use tracing::warn;

use super::{SecurityInstance, SecurityObject, Ssid, UdpSecurityMode};
use crate::error::ObjectError;

/// Checks one instance in isolation; list-wide rules live in
/// [`validate_instances`].
fn validate_instance(instance: &SecurityInstance) -> Result<(), ObjectError> {
    if instance.server_uri.is_none()
        || instance.bootstrap.is_none()
        || instance.udp_security_mode.is_none()
        || (!instance.is_bootstrap() && instance.ssid.is_none())
    {
        return Err(ObjectError::BadRequest);
    }
    if let Some(mode) = instance.udp_security_mode {
        if !mode.is_supported() {
            warn!(mode = mode.as_raw(), "UDP security mode not supported");
            return Err(ObjectError::BadRequest);
        }
        if mode != UdpSecurityMode::NoSec
            && (instance.public_cert_or_psk_identity.is_none()
                || instance.private_cert_or_psk_key.is_none())
        {
            return Err(ObjectError::BadRequest);
        }
    }
    if let Some(sms_mode) = instance.sms_security_mode {
        if sms_mode.requires_key_material()
            && (instance.sms_key_params.is_none() || instance.sms_secret_key.is_none())
        {
            return Err(ObjectError::BadRequest);
        }
    }
    Ok(())
}

/// Validates a proposed instance list: every instance individually, at most
/// one bootstrap instance, and pairwise-distinct Short Server IDs among the
/// non-bootstrap ones. Read-only; an empty list is vacuously valid.
fn validate_instances(instances: &[SecurityInstance]) -> Result<(), ObjectError> {
    let mut seen_ssids: Vec<Ssid> = Vec::new();
    seen_ssids
        .try_reserve_exact(instances.len())
        .map_err(|_| ObjectError::Internal)?;

    let mut bootstrap_present = false;
    for instance in instances {
        validate_instance(instance)?;
        if instance.is_bootstrap() {
            if bootstrap_present {
                warn!("more than one bootstrap-server instance");
                return Err(ObjectError::BadRequest);
            }
            bootstrap_present = true;
        } else {
            seen_ssids.push(instance.ssid.ok_or(ObjectError::BadRequest)?);
        }
    }

    seen_ssids.sort_unstable();
    for pair in seen_ssids.windows(2) {
        if pair[0] == pair[1] {
            warn!(ssid = pair[0], "duplicate short server ID");
            return Err(ObjectError::BadRequest);
        }
    }
    Ok(())
}

impl SecurityObject {
    /// Opens a transaction: deep-clones the live instance list into the
    /// shadow list and snapshots the dirty flag.
    ///
    /// # Panics
    ///
    /// Panics when a transaction is already open; the data-model layer
    /// brackets writes with exactly one `begin`, so a nested `begin` is a
    /// programming error, not a recoverable condition. The `Internal`
    /// variant of the result is reserved for clone failure.
    pub fn transaction_begin(&mut self) -> Result<(), ObjectError> {
        assert!(
            self.saved_instances.is_none(),
            "security transaction already in progress"
        );
        self.saved_instances = Some(self.instances.clone());
        self.saved_modified_since_persist = self.modified_since_persist;
        Ok(())
    }

    /// Validates the proposed (live) state. Read-only: no mutation occurs
    /// regardless of the result.
    ///
    /// Returns `BadRequest` on the first semantic violation and `Internal`
    /// when the duplicate-check working set cannot be allocated.
    pub fn transaction_validate(&self) -> Result<(), ObjectError> {
        validate_instances(&self.instances)
    }

    /// Closes the transaction, keeping the mutated live list as the
    /// authoritative state and discarding the shadow copy.
    pub fn transaction_commit(&mut self) -> Result<(), ObjectError> {
        self.saved_instances = None;
        Ok(())
    }

    /// Closes the transaction, restoring the instance list and the dirty
    /// flag exactly as they were at `begin`. A rollback without an open
    /// transaction is a no-op.
    pub fn transaction_rollback(&mut self) -> Result<(), ObjectError> {
        if let Some(saved) = self.saved_instances.take() {
            self.instances = saved;
            self.modified_since_persist = self.saved_modified_since_persist;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SmsSecurityMode;

    fn server_instance(ssid: Ssid) -> SecurityInstance {
        SecurityInstance {
            server_uri: Some(format!("coaps://server{}.example.com:5684", ssid)),
            bootstrap: Some(false),
            ssid: Some(ssid),
            udp_security_mode: Some(UdpSecurityMode::PreSharedKey),
            public_cert_or_psk_identity: Some(b"identity".to_vec()),
            private_cert_or_psk_key: Some(b"secret-key".to_vec()),
            ..SecurityInstance::default()
        }
    }

    fn bootstrap_instance() -> SecurityInstance {
        SecurityInstance {
            server_uri: Some("coaps://bootstrap.example.com:5684".to_string()),
            bootstrap: Some(true),
            udp_security_mode: Some(UdpSecurityMode::NoSec),
            ..SecurityInstance::default()
        }
    }

    fn populated_object() -> SecurityObject {
        let mut object = SecurityObject::new();
        object.add_instance(bootstrap_instance());
        object.add_instance(server_instance(1));
        object.add_instance(server_instance(2));
        object.clear_modified();
        object
    }

    #[test]
    fn test_empty_repository_is_vacuously_valid() {
        let object = SecurityObject::new();
        assert_eq!(object.transaction_validate(), Ok(()));
    }

    #[test]
    fn test_valid_mixed_repository_passes() {
        let object = populated_object();
        assert_eq!(object.transaction_validate(), Ok(()));
    }

    #[test]
    fn test_duplicate_ssid_rolls_back_to_exact_prior_state() {
        let mut object = populated_object();
        let before = object.instances().to_vec();

        object.transaction_begin().unwrap();
        let index = object.add_instance(server_instance(1)); // duplicate SSID
        assert_eq!(index, 3);

        assert_eq!(object.transaction_validate(), Err(ObjectError::BadRequest));
        object.transaction_rollback().unwrap();

        assert_eq!(object.instances(), before.as_slice());
        assert!(!object.is_modified());
        assert!(!object.in_transaction());
        // The restored state is still valid.
        assert_eq!(object.transaction_validate(), Ok(()));
    }

    #[test]
    fn test_valid_change_commits_and_clears_shadow() {
        let mut object = populated_object();

        object.transaction_begin().unwrap();
        assert!(object.in_transaction());
        object.add_instance(server_instance(3));

        assert_eq!(object.transaction_validate(), Ok(()));
        object.transaction_commit().unwrap();

        assert!(!object.in_transaction());
        assert_eq!(object.instances().len(), 4);
        assert_eq!(object.instances()[3].ssid, Some(3));
        assert!(object.is_modified());
    }

    #[test]
    fn test_rollback_restores_dirty_flag() {
        let mut object = populated_object();
        assert!(!object.is_modified());

        object.transaction_begin().unwrap();
        object.mark_modified();
        object.transaction_rollback().unwrap();
        assert!(!object.is_modified());
    }

    #[test]
    fn test_two_bootstrap_instances_are_rejected() {
        let mut object = SecurityObject::new();
        object.add_instance(bootstrap_instance());
        object.add_instance(bootstrap_instance());
        assert_eq!(object.transaction_validate(), Err(ObjectError::BadRequest));
    }

    #[test]
    fn test_missing_required_fields_are_rejected() {
        // No URI.
        let mut instance = server_instance(1);
        instance.server_uri = None;
        assert_eq!(validate_instance(&instance), Err(ObjectError::BadRequest));

        // Bootstrap flag never written.
        let mut instance = server_instance(1);
        instance.bootstrap = None;
        assert_eq!(validate_instance(&instance), Err(ObjectError::BadRequest));

        // No UDP security mode.
        let mut instance = server_instance(1);
        instance.udp_security_mode = None;
        assert_eq!(validate_instance(&instance), Err(ObjectError::BadRequest));

        // Non-bootstrap instance without an SSID.
        let mut instance = server_instance(1);
        instance.ssid = None;
        assert_eq!(validate_instance(&instance), Err(ObjectError::BadRequest));
    }

    #[test]
    fn test_secured_mode_requires_credentials() {
        let mut instance = server_instance(1);
        instance.private_cert_or_psk_key = None;
        assert_eq!(validate_instance(&instance), Err(ObjectError::BadRequest));

        // NoSec needs no credentials at all.
        let mut instance = server_instance(1);
        instance.udp_security_mode = Some(UdpSecurityMode::NoSec);
        instance.public_cert_or_psk_identity = None;
        instance.private_cert_or_psk_key = None;
        assert_eq!(validate_instance(&instance), Ok(()));
    }

    #[test]
    fn test_unsupported_udp_mode_is_rejected() {
        let mut instance = server_instance(1);
        instance.udp_security_mode = Some(UdpSecurityMode::RawPublicKey);
        assert_eq!(validate_instance(&instance), Err(ObjectError::BadRequest));
    }

    #[test]
    fn test_sms_modes_require_key_material() {
        let mut instance = server_instance(1);
        instance.sms_security_mode = Some(SmsSecurityMode::DtlsPsk);
        assert_eq!(validate_instance(&instance), Err(ObjectError::BadRequest));

        instance.sms_key_params = Some(b"params".to_vec());
        instance.sms_secret_key = Some(b"key".to_vec());
        assert_eq!(validate_instance(&instance), Ok(()));

        // NoSec over SMS needs no key material.
        let mut instance = server_instance(2);
        instance.sms_security_mode = Some(SmsSecurityMode::NoSec);
        assert_eq!(validate_instance(&instance), Ok(()));
    }

    #[test]
    fn test_duplicate_detection_spots_non_adjacent_duplicates() {
        let mut object = SecurityObject::new();
        object.add_instance(server_instance(7));
        object.add_instance(server_instance(3));
        object.add_instance(server_instance(7));
        assert_eq!(object.transaction_validate(), Err(ObjectError::BadRequest));
    }

    #[test]
    #[should_panic(expected = "security transaction already in progress")]
    fn test_nested_begin_panics() {
        let mut object = SecurityObject::new();
        object.transaction_begin().unwrap();
        let _ = object.transaction_begin();
    }

    #[test]
    fn test_rollback_without_transaction_is_noop() {
        let mut object = populated_object();
        let before = object.instances().to_vec();
        object.transaction_rollback().unwrap();
        assert_eq!(object.instances(), before.as_slice());
    }
}
