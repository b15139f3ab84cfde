//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{error, warn};

use crate::packet::DecodeError;
use crate::southbound::{Port, SwitchId};

// Multicast snooping errors.
#[derive(Debug)]
pub enum Error {
    // Configuration errors
    InvalidMaxAge(u32),
    InvalidTimers(Vec<TimerParam>),
    // Switch write path
    SwitchWrite(SwitchId, std::io::Error),
    PacketSend(SwitchId, Port, std::io::Error),
    // Inbound classification
    FrameDecode(SwitchId, DecodeError),
}

// Listener timing parameter that failed validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerParam {
    QueryInterval,
    MaxResponseTime,
    QueryFrequency,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::InvalidMaxAge(max_age) => {
                error!(%max_age, "{}", self);
            }
            Error::InvalidTimers(params) => {
                error!(?params, "{}", self);
            }
            Error::SwitchWrite(switch_id, error) => {
                warn!(%switch_id, error = %with_source(error), "{}", self);
            }
            Error::PacketSend(switch_id, port, error) => {
                warn!(%switch_id, %port, error = %with_source(error), "{}", self);
            }
            Error::FrameDecode(switch_id, error) => {
                warn!(%switch_id, error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidMaxAge(..) => {
                write!(f, "the maximum age must be a positive integer")
            }
            Error::InvalidTimers(..) => {
                write!(f, "timing parameters must be positive integers")
            }
            Error::SwitchWrite(..) => {
                write!(f, "failed to write flow rule")
            }
            Error::PacketSend(..) => {
                write!(f, "failed to send packet")
            }
            Error::FrameDecode(..) => {
                write!(f, "failed to decode inbound frame")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SwitchWrite(_, error) | Error::PacketSend(_, _, error) => {
                Some(error)
            }
            Error::FrameDecode(_, error) => Some(error),
            _ => None,
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
