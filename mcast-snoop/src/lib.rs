//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod config;
pub mod consts;
pub mod debug;
pub mod error;
pub mod events;
pub mod flow;
pub mod host;
pub mod instance;
pub mod manager;
pub mod packet;
pub mod southbound;
pub mod tasks;
