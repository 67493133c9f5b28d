//! Instruction encoding for the five program operations.
//!
//! Tags are literal constants. They equal the first eight bytes of
//! `sha256("global:<name>")` for the deployed program, but are never
//! recomputed at runtime: a drift here corrupts trades silently.

use solana_instruction::{AccountMeta, Instruction};
use solana_pubkey::Pubkey;

use super::{put_string, ByteReader};
use crate::domain::error::EngineError;
use crate::domain::market::Side;

/// Versioned instruction tag table.
pub mod tags {
    pub const CREATE_MARKET: [u8; 8] = [103, 226, 97, 235, 200, 188, 251, 254];
    pub const BUY_SHARES: [u8; 8] = [40, 239, 138, 154, 8, 37, 106, 108];
    pub const SELL_SHARES: [u8; 8] = [184, 164, 169, 16, 231, 158, 199, 196];
    pub const RESOLVE_MARKET: [u8; 8] = [155, 23, 80, 173, 46, 74, 23, 239];
    pub const CLAIM_WINNINGS: [u8; 8] = [161, 215, 24, 59, 14, 236, 242, 221];
}

/// Longest project name the program accepts, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// The system program, required by every instruction that may allocate.
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0; 32]);

/// Typed arguments of one program instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaporInstruction {
    CreateMarket {
        project_id: u64,
        project_name: String,
        /// Unix seconds.
        resolution_timestamp: u64,
        bump: u8,
    },
    BuyShares {
        side: Side,
        /// Lamports deposited.
        amount: u64,
        position_bump: u8,
    },
    SellShares {
        side: Side,
        shares: u64,
        position_bump: u8,
    },
    ResolveMarket {
        winner: Side,
    },
    ClaimWinnings {
        side: Side,
    },
}

impl VaporInstruction {
    /// Label used in logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateMarket { .. } => "create_market",
            Self::BuyShares { .. } => "buy_shares",
            Self::SellShares { .. } => "sell_shares",
            Self::ResolveMarket { .. } => "resolve_market",
            Self::ClaimWinnings { .. } => "claim_winnings",
        }
    }

    pub const fn tag(&self) -> [u8; 8] {
        match self {
            Self::CreateMarket { .. } => tags::CREATE_MARKET,
            Self::BuyShares { .. } => tags::BUY_SHARES,
            Self::SellShares { .. } => tags::SELL_SHARES,
            Self::ResolveMarket { .. } => tags::RESOLVE_MARKET,
            Self::ClaimWinnings { .. } => tags::CLAIM_WINNINGS,
        }
    }

    /// Reject arguments the program would refuse, before any bytes exist.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Self::CreateMarket { project_name, .. } => {
                if project_name.trim().is_empty() {
                    return Err(EngineError::Validation("project name is empty".into()));
                }
                if project_name.len() > MAX_NAME_LEN {
                    return Err(EngineError::Validation(format!(
                        "project name is {} bytes, limit is {MAX_NAME_LEN}",
                        project_name.len()
                    )));
                }
                Ok(())
            }
            Self::BuyShares { amount: 0, .. } => {
                Err(EngineError::Validation("amount must be greater than zero".into()))
            }
            Self::SellShares { shares: 0, .. } => {
                Err(EngineError::Validation("shares must be greater than zero".into()))
            }
            _ => Ok(()),
        }
    }

    /// Instruction data: tag followed by the positional fields.
    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        self.validate()?;
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&self.tag());
        match self {
            Self::CreateMarket {
                project_id,
                project_name,
                resolution_timestamp,
                bump,
            } => {
                out.extend_from_slice(&project_id.to_le_bytes());
                put_string(&mut out, project_name);
                out.extend_from_slice(&resolution_timestamp.to_le_bytes());
                out.push(*bump);
            }
            Self::BuyShares {
                side,
                amount,
                position_bump,
            } => {
                out.push(side.as_byte());
                out.extend_from_slice(&amount.to_le_bytes());
                out.push(*position_bump);
            }
            Self::SellShares {
                side,
                shares,
                position_bump,
            } => {
                out.push(side.as_byte());
                out.extend_from_slice(&shares.to_le_bytes());
                out.push(*position_bump);
            }
            Self::ResolveMarket { winner } => out.push(winner.as_byte()),
            Self::ClaimWinnings { side } => out.push(side.as_byte()),
        }
        Ok(out)
    }

    /// Parse instruction data produced by [`encode`](Self::encode).
    ///
    /// Trailing bytes are rejected.
    pub fn decode(data: &[u8]) -> Result<Self, EngineError> {
        let mut r = ByteReader::new(data, "instruction", EngineError::Validation);
        let tag: [u8; 8] = r.array()?;
        let side = |r: &mut ByteReader<'_>| -> Result<Side, EngineError> {
            let byte = r.u8()?;
            Side::from_byte(byte).ok_or_else(|| r.error(format!("invalid side byte {byte}")))
        };
        let ix = match tag {
            tags::CREATE_MARKET => Self::CreateMarket {
                project_id: r.u64()?,
                project_name: r.string()?,
                resolution_timestamp: r.u64()?,
                bump: r.u8()?,
            },
            tags::BUY_SHARES => Self::BuyShares {
                side: side(&mut r)?,
                amount: r.u64()?,
                position_bump: r.u8()?,
            },
            tags::SELL_SHARES => Self::SellShares {
                side: side(&mut r)?,
                shares: r.u64()?,
                position_bump: r.u8()?,
            },
            tags::RESOLVE_MARKET => Self::ResolveMarket { winner: side(&mut r)? },
            tags::CLAIM_WINNINGS => Self::ClaimWinnings { side: side(&mut r)? },
            other => return Err(r.error(format!("unknown tag {other:?}"))),
        };
        if r.remaining() != 0 {
            return Err(r.error(format!("{} trailing bytes", r.remaining())));
        }
        Ok(ix)
    }

    /// Wrap the encoded data with its program id and account list.
    pub fn into_instruction(
        self,
        program_id: Pubkey,
        accounts: Vec<AccountMeta>,
    ) -> Result<Instruction, EngineError> {
        let data = self.encode()?;
        Ok(Instruction {
            program_id,
            accounts,
            data,
        })
    }
}

// ── Account lists, in the order the program expects them ──

pub fn create_market_accounts(authority: Pubkey, market: Pubkey) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(authority, true),
        AccountMeta::new(market, false),
        AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
    ]
}

/// Buy and sell share one account list.
pub fn trade_accounts(user: Pubkey, market: Pubkey, position: Pubkey) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(user, true),
        AccountMeta::new(market, false),
        AccountMeta::new(position, false),
        AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
    ]
}

pub fn resolve_accounts(authority: Pubkey, market: Pubkey) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(authority, true),
        AccountMeta::new(market, false),
    ]
}

pub fn claim_accounts(user: Pubkey, market: Pubkey, position: Pubkey) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(user, true),
        AccountMeta::new_readonly(market, false),
        AccountMeta::new(position, false),
        AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
    ]
}
