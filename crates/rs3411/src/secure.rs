//! Signed command subsystem: session keys, Ed25519 verification and the
//! command dispatch shared by the MAVLink `SECURE_COMMAND` and DroneCAN
//! `remoteid.SecureCommand` envelopes.
//!
//! Commands carry a 64-byte Ed25519 signature over
//! `sequence ‖ operation ‖ payload` and, for everything except session-key
//! requests, the current session key. Binding to the session key rejects
//! replays of commands captured in an earlier session.

use crc::{Crc, CRC_64_WE};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use tracing::{debug, info};

use crate::params::{KvStore, ParamStore, MAX_PUBLIC_KEYS, PUBLIC_KEY_LEN};

pub const SESSION_KEY_LEN: usize = 8;
pub const SIGNATURE_LEN: usize = 64;
/// Capacity of the data field in the command/reply envelopes (MAVLink
/// SECURE_COMMAND sets the bound; DroneCAN uses the same).
pub const COMMAND_DATA_LEN: usize = 220;

/// Operation codes of the SECURE_COMMAND_OP enum.
pub mod ops {
    pub const GET_SESSION_KEY: u32 = 0;
    pub const GET_PUBLIC_KEYS: u32 = 1;
    pub const SET_PUBLIC_KEYS: u32 = 2;
    pub const REMOVE_PUBLIC_KEYS: u32 = 3;
    pub const GET_REMOTEID_SESSION_KEY: u32 = 4;
    pub const SET_REMOTEID_CONFIG: u32 = 5;
}

/// MAV_RESULT subset used in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandResult {
    Accepted = 0,
    Denied = 2,
    Unsupported = 3,
    Failed = 4,
}

/// Transport-neutral view of an inbound command. `data` holds the payload
/// followed by the signature (`sig_length` trailing bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureCommand {
    pub sequence: u32,
    pub operation: u32,
    pub data_length: u16,
    pub sig_length: u8,
    pub data: Vec<u8>,
}

impl SecureCommand {
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.data_length)]
    }

    pub fn signature(&self) -> &[u8] {
        &self.data[usize::from(self.data_length)..]
    }

    fn lengths_consistent(&self) -> bool {
        let total = usize::from(self.data_length) + usize::from(self.sig_length);
        total == self.data.len() && total <= COMMAND_DATA_LEN
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureCommandReply {
    pub sequence: u32,
    pub operation: u32,
    pub result: CommandResult,
    pub data: Vec<u8>,
}

/// Reply plus operator-facing progress notes (surfaced as STATUSTEXT on
/// MAVLink, debug.LogMessage on DroneCAN).
#[derive(Debug)]
pub struct CommandOutcome {
    pub reply: SecureCommandReply,
    pub notes: Vec<String>,
}

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_WE);

/// Per-session secure-command state: the current session key.
#[derive(Debug, Default)]
pub struct SecureState {
    session_key: [u8; SESSION_KEY_LEN],
}

impl SecureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_key(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.session_key
    }

    /// Derive a fresh session key from the microsecond clock, the hardware
    /// MAC and 32 bits of randomness. Two calls in the same microsecond
    /// still differ because the random word differs.
    pub fn make_session_key(&mut self, now_us: u32, mac: &[u8; 8]) -> [u8; SESSION_KEY_LEN] {
        let mut seed = [0u8; 16];
        seed[..4].copy_from_slice(&now_us.to_le_bytes());
        seed[4..12].copy_from_slice(mac);
        seed[12..].copy_from_slice(&rand::thread_rng().next_u32().to_le_bytes());
        let crc64 = CRC64.checksum(&seed);
        self.session_key = crc64.to_le_bytes();
        self.session_key
    }

    /// Verify a command against the configured public keys.
    ///
    /// An empty key list accepts everything: that is the deliberate
    /// development-mode path, letting a factory-fresh module be configured
    /// before keys are installed.
    pub fn check_signature<K: KvStore>(
        &self,
        params: &ParamStore<K>,
        cmd: &SecureCommand,
    ) -> bool {
        if params.no_public_keys() {
            return true;
        }
        if usize::from(cmd.sig_length) != SIGNATURE_LEN {
            return false;
        }
        let Ok(sig_bytes) = <[u8; SIGNATURE_LEN]>::try_from(cmd.signature())
        else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);

        let mut message = Vec::with_capacity(8 + cmd.payload().len() + SESSION_KEY_LEN);
        message.extend_from_slice(&cmd.sequence.to_le_bytes());
        message.extend_from_slice(&cmd.operation.to_le_bytes());
        message.extend_from_slice(cmd.payload());
        if cmd.operation != ops::GET_SESSION_KEY
            && cmd.operation != ops::GET_REMOTEID_SESSION_KEY
        {
            message.extend_from_slice(&self.session_key);
        }

        for i in 0..MAX_PUBLIC_KEYS {
            let Some(key) = params.get_public_key(i) else {
                continue;
            };
            let Ok(verifying) = VerifyingKey::from_bytes(&key) else {
                continue;
            };
            if verifying.verify(&message, &signature).is_ok() {
                return true;
            }
        }
        false
    }

    /// Authenticate and execute one command.
    pub fn handle_command<K: KvStore>(
        &mut self,
        params: &mut ParamStore<K>,
        cmd: &SecureCommand,
        now_us: u32,
        mac: &[u8; 8],
    ) -> CommandOutcome {
        let mut reply = SecureCommandReply {
            sequence: cmd.sequence,
            operation: cmd.operation,
            result: CommandResult::Unsupported,
            data: Vec::new(),
        };
        let mut notes = Vec::new();

        if !cmd.lengths_consistent() {
            reply.result = CommandResult::Denied;
            return CommandOutcome { reply, notes };
        }
        if !self.check_signature(params, cmd) {
            debug!(operation = cmd.operation, "secure command signature rejected");
            reply.result = CommandResult::Denied;
            return CommandOutcome { reply, notes };
        }

        match cmd.operation {
            ops::GET_SESSION_KEY | ops::GET_REMOTEID_SESSION_KEY => {
                let key = self.make_session_key(now_us, mac);
                reply.data.extend_from_slice(&key);
                reply.result = CommandResult::Accepted;
            }

            ops::GET_PUBLIC_KEYS => {
                let payload = cmd.payload();
                if payload.len() != 2 {
                    reply.result = CommandResult::Unsupported;
                    return CommandOutcome { reply, notes };
                }
                let key_idx = usize::from(payload[0]);
                let num_keys = usize::from(payload[1]);
                let max_fetch = (COMMAND_DATA_LEN - 1) / PUBLIC_KEY_LEN;
                if key_idx >= MAX_PUBLIC_KEYS
                    || num_keys > max_fetch
                    || key_idx + num_keys > MAX_PUBLIC_KEYS
                    || params.no_public_keys()
                {
                    reply.result = CommandResult::Failed;
                    return CommandOutcome { reply, notes };
                }
                reply.data.push(payload[0]);
                for i in 0..num_keys {
                    match params.get_public_key(key_idx + i) {
                        Some(key) => reply.data.extend_from_slice(&key),
                        None => {
                            reply.data.clear();
                            reply.result = CommandResult::Failed;
                            return CommandOutcome { reply, notes };
                        }
                    }
                }
                reply.result = CommandResult::Accepted;
            }

            ops::SET_PUBLIC_KEYS => {
                let payload = cmd.payload();
                if payload.len() < PUBLIC_KEY_LEN + 1 {
                    reply.result = CommandResult::Failed;
                    return CommandOutcome { reply, notes };
                }
                let key_idx = usize::from(payload[0]);
                let num_keys = (payload.len() - 1) / PUBLIC_KEY_LEN;
                if num_keys == 0
                    || key_idx >= MAX_PUBLIC_KEYS
                    || key_idx + num_keys > MAX_PUBLIC_KEYS
                {
                    reply.result = CommandResult::Failed;
                    return CommandOutcome { reply, notes };
                }
                let mut failed = false;
                for i in 0..num_keys {
                    let start = 1 + i * PUBLIC_KEY_LEN;
                    let Ok(key) = <[u8; PUBLIC_KEY_LEN]>::try_from(
                        &payload[start..start + PUBLIC_KEY_LEN],
                    ) else {
                        failed = true;
                        continue;
                    };
                    failed |= !params.set_public_key(key_idx + i, &key);
                }
                reply.result = if failed {
                    CommandResult::Failed
                } else {
                    CommandResult::Accepted
                };
            }

            ops::REMOVE_PUBLIC_KEYS => {
                let payload = cmd.payload();
                if payload.len() != 2 {
                    reply.result = CommandResult::Failed;
                    return CommandOutcome { reply, notes };
                }
                let key_idx = usize::from(payload[0]);
                let num_keys = usize::from(payload[1]);
                if num_keys == 0
                    || key_idx >= MAX_PUBLIC_KEYS
                    || key_idx + num_keys > MAX_PUBLIC_KEYS
                {
                    reply.result = CommandResult::Failed;
                    return CommandOutcome { reply, notes };
                }
                for i in 0..num_keys {
                    params.remove_public_key(key_idx + i);
                }
                reply.result = CommandResult::Accepted;
            }

            ops::SET_REMOTEID_CONFIG => {
                // payload is a NUL-separated set of NAME=VALUE pairs
                reply.result = CommandResult::Accepted;
                for item in cmd.payload().split(|&b| b == 0) {
                    if item.is_empty() {
                        continue;
                    }
                    let Ok(text) = std::str::from_utf8(item) else {
                        reply.result = CommandResult::Failed;
                        continue;
                    };
                    let Some((name, value)) = text.split_once('=') else {
                        continue;
                    };
                    if params.set_by_name_string(name, value) {
                        info!(name, value, "remote config set");
                        notes.push(format!("set {name} OK"));
                    } else {
                        notes.push(format!("set {name} failed"));
                        reply.result = CommandResult::Failed;
                    }
                }
            }

            _ => {
                reply.result = CommandResult::Unsupported;
            }
        }

        CommandOutcome { reply, notes }
    }
}
