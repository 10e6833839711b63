//! Parameter block sent to the scanner before every page.
//!
//! The block is a run of ASCII-tagged sub-records. The firmware parses it
//! positionally, so record order and field widths must not change:
//!
//! | Record | Meaning |
//! |--------|---------|
//! | `#ADF#COL` + code | feed from ADF, colour mode |
//! | `#FMTJPG #JPGd` + 3 digits | JPEG output and quality |
//! | `#GMMUG18` | device gamma 1.8 |
//! | `#CMXUNIT` | colour correction disabled |
//! | `#RSMi` / `#RSSi` + 7 digits | main / sub scan resolution |
//! | `#ACQi` x4 + 7 digits | acquisition rectangle |
//! | `#PAGd000` | page count (unlimited) |
//! | `#BSZi` + 7 digits | host read buffer size |
//! | `#GMT` + channel + ` h100` + 256 bytes | per channel gamma table |

use crate::config::ScanConfig;
use crate::constants::{CMD_PARAMS_PREFIX, FIELD_DIGITS, IN_BUF_SIZE, MAX_PARAMS_LEN};
use crate::error::ConfigError;
use bytes::{BufMut, Bytes, BytesMut};

const GAMMA_CHANNELS: [&[u8; 3]; 3] = [b"RED", b"GRN", b"BLU"];
const GAMMA_TABLE_LEN: usize = 256;

/// An encoded parameter block, ready to be framed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBlock(Bytes);

impl ParameterBlock {
    /// Wrap an already encoded payload, e.g. one captured from another driver.
    pub fn new(payload: impl Into<Bytes>) -> Result<Self, ConfigError> {
        let payload = payload.into();
        check_len(payload.len())?;
        Ok(Self(payload))
    }

    /// Encode the parameters for one page.
    pub fn build(config: &ScanConfig) -> Self {
        let dpi = config.resolution().dpi();
        let mut block = BytesMut::with_capacity(1024);

        block.put_slice(b"#ADF#COL");
        block.put_slice(config.color().code());

        block.put_slice(format!("#FMTJPG #JPGd{:03}", config.quality()).as_bytes());
        block.put_slice(b"#GMMUG18#CMXUNIT");

        block.put_slice(b"#RSM");
        put_decimal(&mut block, dpi);
        block.put_slice(b"#RSS");
        put_decimal(&mut block, dpi);

        block.put_slice(b"#ACQ");
        for field in [0, 0, config.width_px(), config.height_px()] {
            put_decimal(&mut block, field);
        }

        block.put_slice(b"#PAGd000#BSZ");
        put_decimal(&mut block, IN_BUF_SIZE as u32);

        for channel in GAMMA_CHANNELS {
            block.put_slice(b"#GMT");
            block.put_slice(channel);
            block.put_slice(b" h100");
            block.extend((0..GAMMA_TABLE_LEN).map(|v| v as u8));
        }

        // Every field above is fixed width, so this can never trip.
        debug_assert!(block.len() <= MAX_PARAMS_LEN);
        Self(block.freeze())
    }

    /// The `PARAx` header announcing this block's length.
    pub fn header(&self) -> Bytes {
        let mut header = BytesMut::with_capacity(CMD_PARAMS_PREFIX.len() + FIELD_DIGITS);
        header.put_slice(CMD_PARAMS_PREFIX);
        header.put_slice(format!("{:07X}", self.0.len()).as_bytes());
        header.freeze()
    }

    /// Header and payload, in the order they go out on the wire.
    pub fn frame(&self) -> [Bytes; 2] {
        [self.header(), self.0.clone()]
    }

    pub fn payload(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The `PARAx` header has room for 7 hex digits.
fn check_len(len: usize) -> Result<(), ConfigError> {
    if len > MAX_PARAMS_LEN {
        return Err(ConfigError::ParamsTooLarge(len));
    }
    Ok(())
}

/// `i` followed by a 7-digit zero-padded decimal.
fn put_decimal(block: &mut BytesMut, value: u32) {
    block.put_slice(format!("i{:07}", value).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_fields_are_seven_digits() {
        let mut buf = BytesMut::new();
        put_decimal(&mut buf, 300);
        assert_eq!(&buf[..], b"i0000300");
    }

    #[test]
    fn length_limit_is_seven_hex_digits() {
        assert_eq!(check_len(0x0FFF_FFFF), Ok(()));
        assert_eq!(check_len(0x1000_0000), Err(ConfigError::ParamsTooLarge(0x1000_0000)));
    }

    #[test]
    fn wraps_raw_payload() {
        let block = ParameterBlock::new(&b"#ADF#COLC024"[..]).unwrap();
        assert_eq!(block.len(), 12);
        assert_eq!(block.header(), Bytes::from_static(b"PARAx000000C"));
    }
}
