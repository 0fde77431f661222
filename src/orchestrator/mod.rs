//! Screen-level orchestration.
//!
//! This module binds server commands and the user name to a consumer view
//! through one subscription registry, so everything a screen started can be
//! cancelled together when the screen goes away. UI/CLI layers call into
//! this module to keep responsibilities separated.

mod controller;

pub(crate) use controller::{PanelView, ServerPanel};
