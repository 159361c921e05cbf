//! Deferral quota: how many times a visitor may postpone the disable request.
//!
//! The record is swept lazily: every [`QuotaStore::load`] checks whether the
//! quota window has elapsed and starts a fresh one if so. There is no
//! background timer.

mod record;
mod store;

pub use record::{QuotaPolicy, QuotaRecord};
pub use store::{
    QuotaStore, DEFERRALS_KEY, DEFER_UNTIL_KEY, LAST_MODAL_SHOWN_KEY, RESET_DATE_KEY,
};
