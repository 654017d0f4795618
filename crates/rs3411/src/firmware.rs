//! OTA image verification.
//!
//! Firmware images embed an app descriptor: an 8-byte marker followed by
//! `{board_id, image_size, signature[64]}`. The image is acceptable when
//! the descriptor is found, the byte count in front of it matches
//! `image_size`, the board id matches ours and the Ed25519 signature over
//! the image body verifies under one of the configured public keys. The
//! same check runs against the running partition at boot (feeding the
//! arming gate's `parse_fail` on failure) and against the next partition
//! after an upload completes.

use deku::prelude::*;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::fmt;
use tracing::{debug, info, warn};

use crate::params::{KvStore, ParamStore, MAX_PUBLIC_KEYS};
use crate::BOARD_ID;

/// Marker bytes stored reversed so the pattern never appears verbatim in
/// our own image.
const APP_DESCRIPTOR_REV: [u8; 8] =
    [0x19, 0x75, 0xe2, 0x46, 0x37, 0xf1, 0x2a, 0x43];

/// Descriptor trailing the marker in the image.
#[derive(Debug, PartialEq, Eq, Clone, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct AppDescriptor {
    pub board_id: u32,
    pub image_size: u32,
    pub signature: [u8; 64],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    NoDescriptor,
    BadImageSize,
    BoardIdMismatch,
    BadSignature,
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDescriptor => write!(f, "app descriptor not found"),
            Self::BadImageSize => write!(f, "app descriptor size mismatch"),
            Self::BoardIdMismatch => write!(f, "board id mismatch"),
            Self::BadSignature => write!(f, "bad firmware signature"),
        }
    }
}

impl std::error::Error for FirmwareError {}

fn marker() -> [u8; 8] {
    let mut m = APP_DESCRIPTOR_REV;
    m.reverse();
    m
}

/// Locate the descriptor; returns the image length (bytes preceding the
/// marker) and the parsed descriptor.
pub fn find_app_descriptor(image: &[u8]) -> Option<(usize, AppDescriptor)> {
    let marker = marker();
    let offset = image
        .windows(marker.len())
        .position(|w| w == marker)?;
    let tail = &image[offset + marker.len()..];
    let (_, descriptor) = AppDescriptor::from_bytes((tail, 0)).ok()?;
    Some((offset, descriptor))
}

/// Verify one partition image. `lead_bytes` replace the image's first
/// bytes in the signed message when the caller holds them separately
/// (the upload path patches the boot sector last).
pub fn check_partition<K: KvStore>(
    image: &[u8],
    lead_bytes: &[u8],
    params: &ParamStore<K>,
) -> Result<u32, FirmwareError> {
    let (image_len, descriptor) =
        find_app_descriptor(image).ok_or(FirmwareError::NoDescriptor)?;
    if lead_bytes.len() > image_len {
        return Err(FirmwareError::BadImageSize);
    }
    if descriptor.image_size as usize != image_len {
        warn!(
            image_size = descriptor.image_size,
            found = image_len,
            "descriptor image size mismatch"
        );
        return Err(FirmwareError::BadImageSize);
    }

    if params.no_public_keys() {
        info!("no public keys, accepting firmware");
        return Ok(descriptor.board_id);
    }

    let signature = Signature::from_bytes(&descriptor.signature);
    let mut message =
        Vec::with_capacity(lead_bytes.len() + image_len.saturating_sub(lead_bytes.len()));
    message.extend_from_slice(lead_bytes);
    message.extend_from_slice(&image[lead_bytes.len()..image_len]);

    for i in 0..MAX_PUBLIC_KEYS {
        let Some(key) = params.get_public_key(i) else {
            continue;
        };
        let Ok(verifying) = VerifyingKey::from_bytes(&key) else {
            continue;
        };
        if verifying.verify(&message, &signature).is_ok() {
            debug!(key = i, "firmware signature good");
            return Ok(descriptor.board_id);
        }
    }
    Err(FirmwareError::BadSignature)
}

/// Gate an uploaded image before rebooting into it.
///
/// `LOCK_LEVEL == -1` accepts anything (development mode). Otherwise a
/// non-zero board id must match ours and the signature check must pass.
pub fn check_ota_next<K: KvStore>(
    image: &[u8],
    lead_bytes: &[u8],
    params: &ParamStore<K>,
) -> bool {
    let checked = check_partition(image, lead_bytes, params);

    if params.values().lock_level == -1 {
        return true;
    }

    match checked {
        Ok(board_id) => board_id == 0 || board_id == BOARD_ID,
        Err(_) => false,
    }
}

/// Boot-time self test of the running partition. On failure the returned
/// message feeds `parse_fail` and arming stays blocked until reflash.
pub fn check_ota_running<K: KvStore>(
    image: &[u8],
    params: &ParamStore<K>,
) -> Result<(), FirmwareError> {
    check_partition(image, &[], params).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::MemoryKv;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn build_image(
        body: &[u8],
        board_id: u32,
        image_size: u32,
        signing: &SigningKey,
    ) -> Vec<u8> {
        let descriptor = AppDescriptor {
            board_id,
            image_size,
            signature: signing.sign(body).to_bytes(),
        };
        let mut image = body.to_vec();
        image.extend_from_slice(&super::marker());
        image.extend_from_slice(&descriptor.to_bytes().unwrap());
        image
    }

    #[test]
    fn descriptor_found_and_parsed() {
        let signing = SigningKey::generate(&mut OsRng);
        let image = build_image(&[0xab; 100], BOARD_ID, 100, &signing);
        let (len, descriptor) = find_app_descriptor(&image).unwrap();
        assert_eq!(len, 100);
        assert_eq!(descriptor.board_id, BOARD_ID);
        assert_eq!(descriptor.image_size, 100);
    }

    #[test]
    fn valid_image_accepted() {
        let signing = SigningKey::generate(&mut OsRng);
        let mut params = ParamStore::load(MemoryKv::default());
        params.set_public_key(0, signing.verifying_key().as_bytes());
        let image = build_image(&[0xab; 100], BOARD_ID, 100, &signing);
        assert!(check_ota_running(&image, &params).is_ok());
        assert!(check_ota_next(&image, &[], &params));
    }

    #[test]
    fn tampered_body_rejected() {
        let signing = SigningKey::generate(&mut OsRng);
        let mut params = ParamStore::load(MemoryKv::default());
        params.set_public_key(0, signing.verifying_key().as_bytes());
        let mut image = build_image(&[0xab; 100], BOARD_ID, 100, &signing);
        image[10] ^= 0xff;
        assert_eq!(
            check_ota_running(&image, &params),
            Err(FirmwareError::BadSignature)
        );
        assert!(!check_ota_next(&image, &[], &params));
    }

    #[test]
    fn wrong_board_id_rejected_unless_dev_mode() {
        let signing = SigningKey::generate(&mut OsRng);
        let mut params = ParamStore::load(MemoryKv::default());
        params.set_public_key(0, signing.verifying_key().as_bytes());
        let image = build_image(&[0xcd; 64], 999, 64, &signing);
        // signature is valid, board id is not
        assert!(!check_ota_next(&image, &[], &params));

        let desc = crate::params::find("LOCK_LEVEL").unwrap();
        assert!(params.set_as_float(desc, -1.0));
        assert!(check_ota_next(&image, &[], &params));
    }

    #[test]
    fn size_mismatch_rejected() {
        let signing = SigningKey::generate(&mut OsRng);
        let params = ParamStore::load(MemoryKv::default());
        let image = build_image(&[0xab; 100], BOARD_ID, 90, &signing);
        assert_eq!(
            check_partition(&image, &[], &params),
            Err(FirmwareError::BadImageSize)
        );
    }

    #[test]
    fn no_keys_accepts() {
        let signing = SigningKey::generate(&mut OsRng);
        let params = ParamStore::load(MemoryKv::default());
        let mut image = build_image(&[0xab; 100], BOARD_ID, 100, &signing);
        image[10] ^= 0xff;
        assert!(check_ota_running(&image, &params).is_ok());
    }

    #[test]
    fn lead_bytes_substitute_image_head() {
        let signing = SigningKey::generate(&mut OsRng);
        let mut params = ParamStore::load(MemoryKv::default());
        params.set_public_key(0, signing.verifying_key().as_bytes());
        let body = [0x11u8; 100];
        let image = build_image(&body, BOARD_ID, 100, &signing);
        // first 16 bytes on flash differ; the caller supplies the real ones
        let mut flashed = image.clone();
        flashed[..16].fill(0xee);
        assert_eq!(
            check_partition(&flashed, &[], &params),
            Err(FirmwareError::BadSignature)
        );
        assert!(check_partition(&flashed, &body[..16], &params).is_ok());
    }
}
