//! Account decoding for the Market and Position layouts.
//!
//! | Market field      | Offset  | Width |
//! |-------------------|---------|-------|
//! | discriminator     | 0       | 8     |
//! | authority         | 8       | 32    |
//! | project_id        | 40      | 8     |
//! | name length       | 48      | 4     |
//! | name bytes        | 52      | len   |
//! | yes_reserve       | 52+len  | 8     |
//! | no_reserve        | 60+len  | 8     |
//! | total_volume      | 68+len  | 8     |
//! | status            | 76+len  | 1     |
//! | resolution        | 77+len  | 1 or 2|
//! | resolution_ts     | ..      | 8     |
//! | created_at        | ..      | 8     |
//! | bump              | ..      | 1     |
//!
//! | Position field    | Offset | Width |
//! |-------------------|--------|-------|
//! | discriminator     | 0      | 8     |
//! | owner             | 8      | 32    |
//! | market            | 40     | 32    |
//! | side              | 72     | 1     |
//! | shares            | 73     | 8     |
//! | avg_price         | 81     | 8     |
//! | bump              | 89     | 1     |
//!
//! A market buffer that ends right after `total_volume` decodes with the
//! tail defaulted (Open, unresolved). Anything shorter is malformed.

use solana_pubkey::Pubkey;

use super::{put_string, ByteReader};
use crate::domain::error::EngineError;
use crate::domain::market::{Market, MarketStatus, Position, Side};

pub const MARKET_DISCRIMINATOR: [u8; 8] = [219, 190, 213, 55, 0, 227, 198, 154];
pub const POSITION_DISCRIMINATOR: [u8; 8] = [170, 188, 143, 228, 122, 64, 247, 208];

/// Offset of the owner field in a position; used for owner scans.
pub const POSITION_OWNER_OFFSET: usize = 8;
/// Offset of the market field in a position; used for per-market scans.
pub const POSITION_MARKET_OFFSET: usize = 40;

/// Smallest decodable market: empty name, no tail.
pub const MARKET_MIN_LEN: usize = 76;
/// Smallest decodable position: no bump.
pub const POSITION_MIN_LEN: usize = 89;

/// Outcome of decoding a batch where individual entries may be bad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDecoded<T> {
    pub decoded: Vec<(Pubkey, T)>,
    /// Entries that were absent or malformed, with the reason.
    pub skipped: Vec<(Pubkey, EngineError)>,
}

impl<T> Default for BatchDecoded<T> {
    fn default() -> Self {
        Self {
            decoded: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

pub fn decode_market(data: &[u8]) -> Result<Market, EngineError> {
    let mut r = ByteReader::new(data, "market", EngineError::MalformedAccount);
    if data.len() < MARKET_MIN_LEN {
        return Err(r.error(format!(
            "{} bytes, minimum is {MARKET_MIN_LEN}",
            data.len()
        )));
    }
    r.take(8)?;
    let authority = r.pubkey()?;
    let project_id = r.u64()?;
    let project_name = r.string()?;
    let yes_reserve = r.u64()?;
    let no_reserve = r.u64()?;
    let total_volume = r.u64()?;

    let mut market = Market {
        authority,
        project_id,
        project_name,
        yes_reserve,
        no_reserve,
        total_volume,
        status: MarketStatus::Open,
        resolution: None,
        resolution_timestamp: 0,
        created_at: 0,
        bump: None,
    };
    if r.remaining() == 0 {
        return Ok(market);
    }

    let status_byte = r.u8()?;
    market.status = MarketStatus::from_byte(status_byte)
        .ok_or_else(|| r.error(format!("invalid status byte {status_byte}")))?;
    market.resolution = match r.u8()? {
        0 => None,
        1 => {
            let byte = r.u8()?;
            Some(Side::from_byte(byte).ok_or_else(|| r.error(format!("invalid side byte {byte}")))?)
        }
        tag => return Err(r.error(format!("invalid option tag {tag}"))),
    };
    market.resolution_timestamp = r.u64()?;
    market.created_at = r.u64()?;
    market.bump = if r.remaining() > 0 { Some(r.u8()?) } else { None };

    match (market.status, market.resolution) {
        (MarketStatus::Open, Some(_)) => Err(r.error("open market carries a resolution")),
        (MarketStatus::Resolved, None) => Err(r.error("resolved market has no resolution")),
        _ => Ok(market),
    }
}

pub fn decode_position(data: &[u8]) -> Result<Position, EngineError> {
    let mut r = ByteReader::new(data, "position", EngineError::MalformedAccount);
    if data.len() < POSITION_MIN_LEN {
        return Err(r.error(format!(
            "{} bytes, minimum is {POSITION_MIN_LEN}",
            data.len()
        )));
    }
    r.take(8)?;
    let owner = r.pubkey()?;
    let market = r.pubkey()?;
    let side_byte = r.u8()?;
    let side = Side::from_byte(side_byte)
        .ok_or_else(|| r.error(format!("invalid side byte {side_byte}")))?;
    let shares = r.u64()?;
    let avg_price = r.u64()?;
    let bump = if r.remaining() > 0 { Some(r.u8()?) } else { None };
    Ok(Position {
        owner,
        market,
        side,
        shares,
        avg_price,
        bump,
    })
}

fn decode_batch<'a, T>(
    accounts: impl IntoIterator<Item = (Pubkey, Option<&'a [u8]>)>,
    decode: fn(&[u8]) -> Result<T, EngineError>,
) -> BatchDecoded<T> {
    let mut out = BatchDecoded::default();
    for (address, data) in accounts {
        match data.map(decode) {
            Some(Ok(record)) => out.decoded.push((address, record)),
            Some(Err(e)) => out.skipped.push((address, e)),
            None => out
                .skipped
                .push((address, EngineError::NotFound(address.to_string()))),
        }
    }
    out
}

/// Decode many market accounts; absent or malformed ones are set aside.
pub fn decode_markets<'a>(
    accounts: impl IntoIterator<Item = (Pubkey, Option<&'a [u8]>)>,
) -> BatchDecoded<Market> {
    decode_batch(accounts, decode_market)
}

pub fn decode_positions<'a>(
    accounts: impl IntoIterator<Item = (Pubkey, Option<&'a [u8]>)>,
) -> BatchDecoded<Position> {
    decode_batch(accounts, decode_position)
}

/// Serialize a market the way the program stores it.
///
/// Used to stand in for the ledger; decoding is tested against fixed bytes.
pub fn encode_market(market: &Market) -> Vec<u8> {
    let mut out = Vec::with_capacity(MARKET_MIN_LEN + market.project_name.len() + 20);
    out.extend_from_slice(&MARKET_DISCRIMINATOR);
    out.extend_from_slice(market.authority.as_ref());
    out.extend_from_slice(&market.project_id.to_le_bytes());
    put_string(&mut out, &market.project_name);
    out.extend_from_slice(&market.yes_reserve.to_le_bytes());
    out.extend_from_slice(&market.no_reserve.to_le_bytes());
    out.extend_from_slice(&market.total_volume.to_le_bytes());
    out.push(market.status.as_byte());
    match market.resolution {
        None => out.push(0),
        Some(side) => out.extend_from_slice(&[1, side.as_byte()]),
    }
    out.extend_from_slice(&market.resolution_timestamp.to_le_bytes());
    out.extend_from_slice(&market.created_at.to_le_bytes());
    if let Some(bump) = market.bump {
        out.push(bump);
    }
    out
}

pub fn encode_position(position: &Position) -> Vec<u8> {
    let mut out = Vec::with_capacity(POSITION_MIN_LEN + 1);
    out.extend_from_slice(&POSITION_DISCRIMINATOR);
    out.extend_from_slice(position.owner.as_ref());
    out.extend_from_slice(position.market.as_ref());
    out.push(position.side.as_byte());
    out.extend_from_slice(&position.shares.to_le_bytes());
    out.extend_from_slice(&position.avg_price.to_le_bytes());
    if let Some(bump) = position.bump {
        out.push(bump);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Resolved market 42 "Vapor" after Scenario A, written out by hand.
    fn golden_market() -> Vec<u8> {
        [
            &[219, 190, 213, 55, 0, 227, 198, 154][..], // discriminator
            &[1u8; 32],                                // authority
            &[42, 0, 0, 0, 0, 0, 0, 0],                // project id
            &[5, 0, 0, 0],                             // name length
            b"Vapor",
            &[93, 160, 47, 54, 0, 0, 0, 0],   // yes 909_090_909
            &[0, 171, 144, 65, 0, 0, 0, 0],   // no 1_100_000_000
            &[0, 225, 245, 5, 0, 0, 0, 0],    // volume 100_000_000
            &[1],                             // Resolved
            &[1, 0],                          // Some(Yes)
            &[0, 241, 83, 101, 0, 0, 0, 0],   // resolution 1_700_000_000
            &[192, 174, 68, 101, 0, 0, 0, 0], // created 1_699_000_000
            &[253],                           // bump
        ]
        .concat()
    }

    fn golden_position() -> Vec<u8> {
        [
            &[170, 188, 143, 228, 122, 64, 247, 208][..],
            &[7u8; 32],                       // owner
            &[9u8; 32],                       // market
            &[1],                             // No
            &[163, 41, 107, 5, 0, 0, 0, 0],   // shares 90_909_091
            &[1, 0, 0, 0, 0, 0, 0, 0],        // avg price
            &[252],                           // bump
        ]
        .concat()
    }

    #[test]
    fn test_decode_market_golden() {
        let market = decode_market(&golden_market()).unwrap();
        assert_eq!(market.authority, Pubkey::new_from_array([1; 32]));
        assert_eq!(market.project_id, 42);
        assert_eq!(market.project_name, "Vapor");
        assert_eq!(market.yes_reserve, 909_090_909);
        assert_eq!(market.no_reserve, 1_100_000_000);
        assert_eq!(market.total_volume, 100_000_000);
        assert_eq!(market.status, MarketStatus::Resolved);
        assert_eq!(market.resolution, Some(Side::Yes));
        assert_eq!(market.resolution_timestamp, 1_700_000_000);
        assert_eq!(market.created_at, 1_699_000_000);
        assert_eq!(market.bump, Some(253));
    }

    #[test]
    fn test_decode_position_golden() {
        let position = decode_position(&golden_position()).unwrap();
        assert_eq!(position.owner, Pubkey::new_from_array([7; 32]));
        assert_eq!(position.market, Pubkey::new_from_array([9; 32]));
        assert_eq!(position.side, Side::No);
        assert_eq!(position.shares, 90_909_091);
        assert_eq!(position.avg_price, 1);
        assert_eq!(position.bump, Some(252));
    }

    #[test]
    fn test_position_scan_offsets() {
        let data = golden_position();
        assert_eq!(&data[POSITION_OWNER_OFFSET..POSITION_OWNER_OFFSET + 32], &[7u8; 32]);
        assert_eq!(&data[POSITION_MARKET_OFFSET..POSITION_MARKET_OFFSET + 32], &[9u8; 32]);
    }

    #[test]
    fn test_encoders_reproduce_golden_bytes() {
        let golden = golden_market();
        assert_eq!(encode_market(&decode_market(&golden).unwrap()), golden);
        let golden = golden_position();
        assert_eq!(encode_position(&decode_position(&golden).unwrap()), golden);
    }

    #[test]
    fn test_market_one_byte_short_is_malformed() {
        let base = golden_market();
        // header + empty name + reserves + volume, one byte missing
        let mut minimal = base[..48].to_vec();
        minimal.extend_from_slice(&[0, 0, 0, 0]);
        minimal.extend_from_slice(&[0u8; 24]);
        assert_eq!(minimal.len(), MARKET_MIN_LEN);
        assert!(decode_market(&minimal).is_ok());

        let err = decode_market(&minimal[..MARKET_MIN_LEN - 1]).unwrap_err();
        assert!(matches!(err, EngineError::MalformedAccount(_)));
        assert!(err.is_absent());
    }

    #[test]
    fn test_market_name_length_overrun_is_malformed() {
        let mut data = golden_market();
        data[48..52].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_market(&data),
            Err(EngineError::MalformedAccount(_))
        ));
    }

    #[test]
    fn test_market_without_tail_defaults_open() {
        let data = golden_market();
        let market = decode_market(&data[..52 + 5 + 24]).unwrap();
        assert_eq!(market.status, MarketStatus::Open);
        assert_eq!(market.resolution, None);
        assert_eq!(market.bump, None);
        assert_eq!(market.total_volume, 100_000_000);
    }

    #[test]
    fn test_market_inconsistent_resolution_is_malformed() {
        let mut data = golden_market();
        let status_at = 52 + 5 + 24;
        data[status_at] = 0; // Open but Some(Yes)
        assert!(decode_market(&data).is_err());
    }

    #[test]
    fn test_position_short_and_bad_side() {
        let data = golden_position();
        assert!(decode_position(&data[..POSITION_MIN_LEN]).unwrap().bump.is_none());
        assert!(decode_position(&data[..POSITION_MIN_LEN - 1]).is_err());

        let mut bad = data;
        bad[72] = 3;
        assert!(matches!(
            decode_position(&bad),
            Err(EngineError::MalformedAccount(_))
        ));
    }

    #[test]
    fn test_batch_skips_bad_entries() {
        let good = golden_position();
        let short = vec![0u8; 10];
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let c = Pubkey::new_unique();
        let batch = decode_positions([
            (a, Some(good.as_slice())),
            (b, Some(short.as_slice())),
            (c, None),
        ]);
        assert_eq!(batch.decoded.len(), 1);
        assert_eq!(batch.decoded[0].0, a);
        assert_eq!(batch.skipped.len(), 2);
        assert!(batch.skipped.iter().all(|(_, e)| e.is_absent()));
    }
}
