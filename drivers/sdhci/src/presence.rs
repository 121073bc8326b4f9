// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Card presence tracking.
//!
//! The presence flag lives under its own lock so that hot-plug polling is
//! never stuck behind a long transfer. Lock order is transfer lock, then
//! presence lock; the presence path never takes the transfer lock.

use core::time::Duration;

use log::{info, warn};

use crate::{
    card::CardInfo,
    hal::SdhciHal,
    host::{ResetKind, SdhciHost},
    regs::PRESENT_STATE,
};

/// Delay before the first presence poll after attach.
pub const PRESENCE_FIRST_POLL: Duration = Duration::from_millis(50);
/// Period of the presence poll.
pub const PRESENCE_POLL_PERIOD: Duration = Duration::from_secs(1);

/// What the driver believes about the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPresence {
    NotPresent,
    Present,
    /// The card changed identity or failed beyond recovery. The next presence
    /// query reports a change and drops back to `NotPresent`.
    Remount,
}

/// Media state reported to the storage stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Online,
    Offline,
}

impl<H: SdhciHal> SdhciHost<H> {
    /// Raw card-detect status.
    pub fn card_inserted(&self) -> bool {
        self.regs
            .present_state()
            .is_set(PRESENT_STATE::CARD_INSERTED)
    }

    pub fn card_presence(&self) -> CardPresence {
        *self.presence.lock()
    }

    pub(crate) fn media_ready(&self) -> bool {
        *self.presence.lock() == CardPresence::Present && self.card_inserted()
    }

    /// Forces the storage stack to treat the card as a new device.
    pub(crate) fn mark_remount(&self) {
        let mut presence = self.presence.lock();
        if *presence != CardPresence::Remount {
            warn!("sdhci: card needs remount");
        }
        *presence = CardPresence::Remount;
    }

    /// Publishes freshly initialized card state. Returns `false` if a
    /// different card was known before.
    pub(crate) fn adopt_card(&self, info: CardInfo) -> bool {
        let mut card = self.card.lock();
        let same = card.cid.is_none() || card.cid == info.cid;
        if !same {
            warn!("sdhci: card identity changed");
        }
        *card = info;
        same
    }

    /// Samples the card-detect bit and returns `(present, changed)`.
    ///
    /// `changed` is set once per insertion, removal or remount. A newly
    /// inserted card is reset and initialized here; if that fails the slot
    /// stays empty and the next call tries again.
    pub fn query_media_presence(&self) -> (bool, bool) {
        let mut presence = self.presence.lock();
        let inserted = self.card_inserted();

        let changed = match (*presence, inserted) {
            (CardPresence::Remount, _) => {
                *presence = CardPresence::NotPresent;
                true
            }
            (CardPresence::Present, true) | (CardPresence::NotPresent, false) => false,
            (CardPresence::Present, false) => {
                info!("sdhci: card removed");
                *presence = CardPresence::NotPresent;
                true
            }
            (CardPresence::NotPresent, true) => {
                info!("sdhci: card inserted");
                self.reset(ResetKind::All);
                match self.init_card() {
                    Ok(info) => {
                        self.adopt_card(info);
                        *presence = CardPresence::Present;
                        true
                    }
                    Err(err) => {
                        warn!("sdhci: card initialization failed: {err}");
                        false
                    }
                }
            }
        };

        (*presence == CardPresence::Present, changed)
    }

    /// Presence timer callback. Reports changes to the media listener and
    /// returns the delay until the next call.
    pub fn handle_timer(&self) -> Duration {
        let (present, changed) = self.query_media_presence();
        if changed {
            let state = if present {
                MediaState::Online
            } else {
                MediaState::Offline
            };
            info!("sdhci: media {:?}", state);
            if let Some(listener) = &self.media_listener {
                listener(state);
            }
        }
        PRESENCE_POLL_PERIOD
    }

    /// Whether writes are refused, by configuration or by the card's
    /// write-protect switch.
    pub fn query_write_protect(&self) -> bool {
        self.config.read_only
            || !self
                .regs
                .present_state()
                .is_set(PRESENT_STATE::WRITE_ENABLED)
    }
}
