//! Program events carried in transaction logs.
//!
//! Every state change emits one event as a `Program data: <base64>` log
//! line: an 8-byte discriminator followed by the event fields in the
//! same little-endian layout as instructions. Discriminators are the
//! first eight bytes of `sha256("event:<Name>")`, kept as literals.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use solana_pubkey::Pubkey;

use super::ByteReader;
use crate::domain::error::EngineError;
use crate::domain::market::Side;

/// Log prefix of an emitted event.
pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

/// Versioned event discriminator table.
pub mod discriminators {
    pub const MARKET_CREATED: [u8; 8] = [88, 184, 130, 231, 226, 84, 6, 58];
    pub const SHARES_BOUGHT: [u8; 8] = [240, 98, 69, 10, 253, 234, 226, 65];
    pub const SHARES_SOLD: [u8; 8] = [35, 231, 5, 53, 228, 158, 113, 251];
    pub const MARKET_RESOLVED: [u8; 8] = [89, 67, 230, 95, 143, 106, 199, 202];
    pub const WINNINGS_CLAIMED: [u8; 8] = [187, 184, 29, 196, 54, 117, 70, 150];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaporEvent {
    MarketCreated {
        market: Pubkey,
        project_id: u64,
        authority: Pubkey,
    },
    SharesBought {
        market: Pubkey,
        user: Pubkey,
        side: Side,
        /// Lamports deposited.
        amount: u64,
        shares: u64,
    },
    SharesSold {
        market: Pubkey,
        user: Pubkey,
        side: Side,
        shares: u64,
        /// Lamports paid out.
        payout: u64,
    },
    MarketResolved {
        market: Pubkey,
        winner: Side,
    },
    WinningsClaimed {
        market: Pubkey,
        user: Pubkey,
        payout: u64,
    },
}

impl VaporEvent {
    pub const fn discriminator(&self) -> [u8; 8] {
        match self {
            Self::MarketCreated { .. } => discriminators::MARKET_CREATED,
            Self::SharesBought { .. } => discriminators::SHARES_BOUGHT,
            Self::SharesSold { .. } => discriminators::SHARES_SOLD,
            Self::MarketResolved { .. } => discriminators::MARKET_RESOLVED,
            Self::WinningsClaimed { .. } => discriminators::WINNINGS_CLAIMED,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        out.extend_from_slice(&self.discriminator());
        match self {
            Self::MarketCreated {
                market,
                project_id,
                authority,
            } => {
                out.extend_from_slice(market.as_ref());
                out.extend_from_slice(&project_id.to_le_bytes());
                out.extend_from_slice(authority.as_ref());
            }
            Self::SharesBought {
                market,
                user,
                side,
                amount,
                shares,
            } => {
                out.extend_from_slice(market.as_ref());
                out.extend_from_slice(user.as_ref());
                out.push(side.as_byte());
                out.extend_from_slice(&amount.to_le_bytes());
                out.extend_from_slice(&shares.to_le_bytes());
            }
            Self::SharesSold {
                market,
                user,
                side,
                shares,
                payout,
            } => {
                out.extend_from_slice(market.as_ref());
                out.extend_from_slice(user.as_ref());
                out.push(side.as_byte());
                out.extend_from_slice(&shares.to_le_bytes());
                out.extend_from_slice(&payout.to_le_bytes());
            }
            Self::MarketResolved { market, winner } => {
                out.extend_from_slice(market.as_ref());
                out.push(winner.as_byte());
            }
            Self::WinningsClaimed {
                market,
                user,
                payout,
            } => {
                out.extend_from_slice(market.as_ref());
                out.extend_from_slice(user.as_ref());
                out.extend_from_slice(&payout.to_le_bytes());
            }
        }
        out
    }

    /// Parse event bytes; unknown discriminators and trailing bytes fail.
    pub fn decode(data: &[u8]) -> Result<Self, EngineError> {
        let mut r = ByteReader::new(data, "event", EngineError::MalformedAccount);
        let discriminator: [u8; 8] = r.array()?;
        let side = |r: &mut ByteReader<'_>| -> Result<Side, EngineError> {
            let byte = r.u8()?;
            Side::from_byte(byte).ok_or_else(|| r.error(format!("invalid side byte {byte}")))
        };
        let event = match discriminator {
            discriminators::MARKET_CREATED => Self::MarketCreated {
                market: r.pubkey()?,
                project_id: r.u64()?,
                authority: r.pubkey()?,
            },
            discriminators::SHARES_BOUGHT => Self::SharesBought {
                market: r.pubkey()?,
                user: r.pubkey()?,
                side: side(&mut r)?,
                amount: r.u64()?,
                shares: r.u64()?,
            },
            discriminators::SHARES_SOLD => Self::SharesSold {
                market: r.pubkey()?,
                user: r.pubkey()?,
                side: side(&mut r)?,
                shares: r.u64()?,
                payout: r.u64()?,
            },
            discriminators::MARKET_RESOLVED => Self::MarketResolved {
                market: r.pubkey()?,
                winner: side(&mut r)?,
            },
            discriminators::WINNINGS_CLAIMED => Self::WinningsClaimed {
                market: r.pubkey()?,
                user: r.pubkey()?,
                payout: r.u64()?,
            },
            other => return Err(r.error(format!("unknown discriminator {other:?}"))),
        };
        if r.remaining() != 0 {
            return Err(r.error(format!("{} trailing bytes", r.remaining())));
        }
        Ok(event)
    }

    /// The log line the program writes for this event.
    pub fn to_log_line(&self) -> String {
        format!("{PROGRAM_DATA_PREFIX}{}", STANDARD.encode(self.encode()))
    }

    /// Parse one log line; `None` for anything that is not a Vapor event.
    pub fn from_log_line(line: &str) -> Option<Self> {
        let payload = line.strip_prefix(PROGRAM_DATA_PREFIX)?;
        let bytes = STANDARD.decode(payload.trim()).ok()?;
        Self::decode(&bytes).ok()
    }
}

/// Every Vapor event in a transaction log, in emission order.
///
/// Lines from other programs, and data lines that do not decode, are skipped.
pub fn parse_logs<S: AsRef<str>>(logs: &[S]) -> Vec<VaporEvent> {
    logs.iter()
        .filter_map(|line| VaporEvent::from_log_line(line.as_ref()))
        .collect()
}
