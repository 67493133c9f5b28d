//! Program-derived addresses for markets and positions.
//!
//! Seeds must match the deployed program byte for byte:
//! - market:   `"vapor-market" ++ project_id (u64 LE)`
//! - position: `"vapor-position" ++ market ++ owner ++ [side]`
//!
//! An address and the bump it was derived with travel together as a
//! [`ProgramAddress`]. When a bump is supplied from outside (e.g. read from
//! an account), it is checked against the seeds and never silently
//! replaced with a freshly searched one.

use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;

use super::error::EngineError;
use super::market::Side;

/// Program id of the deployed Vapor market program.
pub const VAPOR_PROGRAM_ID: &str = "51yNKeu2zXajKMy53BitcGDnQMpdBLWuK75sff7eL14P";

/// [`VAPOR_PROGRAM_ID`] as a key.
pub const VAPOR_PROGRAM: Pubkey = Pubkey::from_str_const(VAPOR_PROGRAM_ID);

pub const MARKET_SEED: &[u8] = b"vapor-market";
pub const POSITION_SEED: &[u8] = b"vapor-position";

/// A derived address together with the bump that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramAddress {
    pub address: Pubkey,
    pub bump: u8,
}

/// Derives market and position addresses under one program id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl AddressDeriver {
    pub const fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    /// Deriver for the deployed program id.
    pub const fn vapor() -> Self {
        Self::new(VAPOR_PROGRAM)
    }

    pub const fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Address and canonical bump of the market for `project_id`.
    pub fn market(&self, project_id: u64) -> ProgramAddress {
        let id = project_id.to_le_bytes();
        let (address, bump) =
            Pubkey::find_program_address(&[MARKET_SEED, &id], &self.program_id);
        ProgramAddress { address, bump }
    }

    /// Address and canonical bump of the (market, owner, side) position.
    pub fn position(&self, market: &Pubkey, owner: &Pubkey, side: Side) -> ProgramAddress {
        let side_byte = [side.as_byte()];
        let (address, bump) = Pubkey::find_program_address(
            &[POSITION_SEED, market.as_ref(), owner.as_ref(), &side_byte],
            &self.program_id,
        );
        ProgramAddress { address, bump }
    }

    /// Rebuild a market address from a bump obtained elsewhere.
    ///
    /// Fails when the bump does not yield a valid address for these seeds.
    pub fn market_with_bump(&self, project_id: u64, bump: u8) -> Result<ProgramAddress, EngineError> {
        let id = project_id.to_le_bytes();
        let address = Pubkey::create_program_address(&[MARKET_SEED, &id, &[bump]], &self.program_id)
            .map_err(|e| {
                EngineError::Validation(format!("bump {bump} invalid for market {project_id}: {e}"))
            })?;
        Ok(ProgramAddress { address, bump })
    }

    /// Rebuild a position address from a bump obtained elsewhere.
    pub fn position_with_bump(
        &self,
        market: &Pubkey,
        owner: &Pubkey,
        side: Side,
        bump: u8,
    ) -> Result<ProgramAddress, EngineError> {
        let address = Pubkey::create_program_address(
            &[POSITION_SEED, market.as_ref(), owner.as_ref(), &[side.as_byte()], &[bump]],
            &self.program_id,
        )
        .map_err(|e| EngineError::Validation(format!("bump {bump} invalid for position: {e}")))?;
        Ok(ProgramAddress { address, bump })
    }

    /// Confirm that `expected` really is the market address for `project_id`.
    pub fn verify_market(&self, project_id: u64, expected: &ProgramAddress) -> Result<(), EngineError> {
        let rebuilt = self.market_with_bump(project_id, expected.bump)?;
        if rebuilt.address != expected.address {
            return Err(EngineError::Validation(format!(
                "address {} does not match market {project_id} with bump {}",
                expected.address, expected.bump
            )));
        }
        Ok(())
    }
}

impl Default for AddressDeriver {
    fn default() -> Self {
        Self::vapor()
    }
}
