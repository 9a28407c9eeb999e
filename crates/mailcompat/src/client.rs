//! The fixed set of email clients the engine models.
//!
//! Each client maps to a `(family, platform)` key pair into the caniemail
//! `stats` table. Some vendors are recorded under inconsistent keys across
//! features, so a profile also carries an ordered table of fallback pairs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Identifier of a modeled email client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ClientId {
    GmailWeb,
    AppleMail,
    OutlookWin,
    YahooMail,
}

/// Rendering engine class behind a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Chromium,
    Webkit,
    Word,
}

impl EngineKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Webkit => "webkit",
            Self::Word => "word",
        }
    }
}

/// Key pair used to index a feature's `stats` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsKey {
    pub family: &'static str,
    pub platform: &'static str,
}

impl StatsKey {
    const fn new(family: &'static str, platform: &'static str) -> Self {
        Self { family, platform }
    }
}

impl fmt::Display for StatsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.platform)
    }
}

/// Dataset lookup profile for one client.
#[derive(Debug, Clone, Copy)]
pub struct ClientProfile {
    pub primary: StatsKey,
    /// Tried in order when `primary` has no entry for a feature.
    pub fallbacks: &'static [StatsKey],
}

impl ClientProfile {
    /// Primary key first, then fallbacks.
    pub fn keys(&self) -> impl Iterator<Item = StatsKey> + '_ {
        std::iter::once(self.primary).chain(self.fallbacks.iter().copied())
    }
}

const YAHOO_FALLBACKS: &[StatsKey] = &[
    StatsKey::new("yahoo", "webmail"),
    StatsKey::new("yahoo", "desktop"),
    StatsKey::new("yahoo-mail", "desktop-webmail"),
    StatsKey::new("yahoo-mail", "webmail"),
    StatsKey::new("yahoo-mail", "desktop"),
];

const GMAIL: ClientProfile = ClientProfile {
    primary: StatsKey::new("gmail", "desktop-webmail"),
    fallbacks: &[],
};
const APPLE_MAIL: ClientProfile = ClientProfile {
    primary: StatsKey::new("apple-mail", "macos"),
    fallbacks: &[],
};
const OUTLOOK_WIN: ClientProfile = ClientProfile {
    primary: StatsKey::new("outlook", "windows"),
    fallbacks: &[],
};
const YAHOO_MAIL: ClientProfile = ClientProfile {
    primary: StatsKey::new("yahoo", "desktop-webmail"),
    fallbacks: YAHOO_FALLBACKS,
};

impl ClientId {
    pub const ALL: [Self; 4] = [
        Self::GmailWeb,
        Self::AppleMail,
        Self::OutlookWin,
        Self::YahooMail,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GmailWeb => "gmail-web",
            Self::AppleMail => "apple-mail",
            Self::OutlookWin => "outlook-win",
            Self::YahooMail => "yahoo-mail",
        }
    }

    /// Name shown in UI and reports.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::GmailWeb => "Gmail Web",
            Self::AppleMail => "Apple Mail",
            Self::OutlookWin => "Outlook Windows",
            Self::YahooMail => "Yahoo Mail",
        }
    }

    /// Short vendor name embedded in compatibility messages.
    #[must_use]
    pub const fn vendor_name(self) -> &'static str {
        match self {
            Self::GmailWeb => "Gmail",
            Self::AppleMail => "Apple Mail",
            Self::OutlookWin => "Outlook",
            Self::YahooMail => "Yahoo Mail",
        }
    }

    #[must_use]
    pub const fn renderer_name(self) -> &'static str {
        match self {
            Self::OutlookWin => "Outlook Windows (Word-style simulation)",
            other => other.display_name(),
        }
    }

    #[must_use]
    pub const fn engine(self) -> EngineKind {
        match self {
            Self::GmailWeb | Self::YahooMail => EngineKind::Chromium,
            Self::AppleMail => EngineKind::Webkit,
            Self::OutlookWin => EngineKind::Word,
        }
    }

    /// Output is an approximation rather than a real client rendering.
    #[must_use]
    pub const fn is_simulated(self) -> bool {
        matches!(self.engine(), EngineKind::Word)
    }

    #[must_use]
    pub const fn profile(self) -> ClientProfile {
        match self {
            Self::GmailWeb => GMAIL,
            Self::AppleMail => APPLE_MAIL,
            Self::OutlookWin => OUTLOOK_WIN,
            Self::YahooMail => YAHOO_MAIL,
        }
    }

    #[must_use]
    pub fn descriptor(self) -> ClientDescriptor {
        ClientDescriptor {
            id: self,
            name: self.display_name().to_string(),
            engine: self.engine(),
            simulated: self.is_simulated(),
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientId {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EngineError::UnknownClient {
                id: raw.to_string(),
            })
    }
}

/// Client metadata exposed to UI and reporting collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub id: ClientId,
    pub name: String,
    pub engine: EngineKind,
    pub simulated: bool,
}

#[must_use]
pub fn descriptors() -> Vec<ClientDescriptor> {
    ClientId::ALL.into_iter().map(ClientId::descriptor).collect()
}
