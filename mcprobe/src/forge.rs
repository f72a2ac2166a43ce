//! Forge mod loader metadata embedded in the Java status response.
//!
//! Older Forge versions send plain JSON lists (`modinfo.modList` for FML 1,
//! `forgeData.mods` for FML 2). Since 1.18.1 the mod and channel lists are
//! packed into a binary blob which is smuggled through the JSON as a string of
//! UTF-16 code units carrying 15 bits each (`forgeData.d`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ByteBuffer, Error};

/// Version marker used for mods the client doesn't need to have installed.
pub const NOT_REQUIRED_FOR_CLIENT: &str = "<not required for client>";

const SERVER_ONLY_FLAG: i32 = 0b1;

/// A network channel registered by a mod, or by the loader itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ForgeChannel {
    /// Fully qualified name, like `fml:handshake`.
    pub name: String,
    pub version: String,
    /// Whether a client must have this channel to join.
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ForgeMod {
    pub id: String,
    /// The mod version, or [`NOT_REQUIRED_FOR_CLIENT`] for server-only mods.
    pub marker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForgeData {
    /// Forge Mod Loader network version.
    pub network_version: u32,
    pub mods: Vec<ForgeMod>,
    /// Channels of all mods followed by the channels not owned by a mod.
    pub channels: Vec<ForgeChannel>,
    /// The server cut the lists short to keep the status packet small.
    pub truncated: bool,
}

#[derive(Deserialize)]
struct RawForgeData {
    #[serde(rename = "fmlNetworkVersion", default = "default_network_version")]
    network_version: u32,
    #[serde(default)]
    channels: Vec<RawChannel>,
    mods: Option<Vec<RawMod>>,
    #[serde(rename = "modList")]
    mod_list: Option<Vec<RawMod>>,
    d: Option<String>,
}

const fn default_network_version() -> u32 {
    1
}

#[derive(Deserialize)]
struct RawChannel {
    res: String,
    version: String,
    required: bool,
}

#[derive(Deserialize)]
struct RawMod {
    modid: Option<String>,
    #[serde(rename = "modId")]
    mod_id: Option<String>,
    modmarker: Option<String>,
    version: Option<String>,
}

impl TryFrom<RawMod> for ForgeMod {
    type Error = Error;

    fn try_from(raw: RawMod) -> Result<Self, Error> {
        // FML 1 calls the marker `version`, FML 2 spells the id `modId`.
        let marker = raw.modmarker.or(raw.version).ok_or_else(|| {
            Error::Validation("mod version in forge mod data must be provided".to_owned())
        })?;
        let id = raw.modid.or(raw.mod_id).ok_or_else(|| {
            Error::Validation(format!(
                "mod id in forge mod data must be provided (mod version {marker:?})"
            ))
        })?;
        Ok(Self { id, marker })
    }
}

/// Unpacks the 15-bits-per-code-unit stream into the bytes it encodes.
///
/// The first two code units hold the byte length (`low | high << 15`).
/// Leftover bits after the last byte are discarded; a stream that runs dry
/// early is padded with zero bits.
///
/// # Errors
/// If the header is missing or declares far more bytes than the string can hold.
pub fn unpack(packed: &str) -> Result<ByteBuffer, Error> {
    let units: Vec<u16> = packed.encode_utf16().collect();
    let [low, high, rest @ ..] = units.as_slice() else {
        return Err(Error::Protocol(
            "packed forge data is missing its length header".to_owned(),
        ));
    };
    let size = usize::from(*low) | (usize::from(*high) << 15);
    if size > rest.len() * 2 + 2 {
        return Err(Error::Protocol(format!(
            "packed forge data declares {size} bytes but carries {} code units",
            rest.len()
        )));
    }

    let mut out = Vec::with_capacity(size);
    let mut units = rest.iter();
    let mut value: u32 = 0;
    let mut bits: i32 = 0;
    while out.len() < size {
        if bits < 8 {
            if let Some(unit) = units.next() {
                value |= u32::from(unit & 0x7FFF) << bits;
                bits += 15;
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        out.push(value as u8);
        value >>= 8;
        bits -= 8;
    }
    Ok(ByteBuffer::from(out))
}

fn decode_channel(buffer: &mut ByteBuffer, mod_id: Option<&str>) -> Result<ForgeChannel, Error> {
    let name = buffer.read_utf()?;
    let name = match mod_id {
        Some(mod_id) => format!("{mod_id}:{name}"),
        None => name,
    };
    Ok(ForgeChannel {
        name,
        version: buffer.read_utf()?,
        required: buffer.read_bool()?,
    })
}

fn decode_mod(buffer: &mut ByteBuffer) -> Result<(ForgeMod, Vec<ForgeChannel>), Error> {
    let flags = buffer.read_varint()?;
    let channel_count = flags >> 1;
    let server_only = flags & SERVER_ONLY_FLAG != 0;
    let id = buffer.read_utf()?;
    let marker = if server_only {
        NOT_REQUIRED_FOR_CLIENT.to_owned()
    } else {
        buffer.read_utf()?
    };
    let channels = (0..channel_count)
        .map(|_| decode_channel(buffer, Some(&id)))
        .collect::<Result<_, _>>()?;
    Ok((ForgeMod { id, marker }, channels))
}

impl ForgeData {
    /// Builds forge data from the `forgeData`/`modinfo` object of a status response.
    ///
    /// # Errors
    /// [`Error::Validation`] for malformed JSON lists, [`Error::Protocol`] for a
    /// malformed packed stream.
    pub fn build(raw: &Value) -> Result<Self, Error> {
        let raw = RawForgeData::deserialize(raw)
            .map_err(|e| Error::Validation(format!("invalid forge data: {e}")))?;
        if let Some(packed) = &raw.d {
            return Self::decode(packed, raw.network_version);
        }

        let mods = match (raw.mods, raw.mod_list) {
            (Some(mods), _) if !mods.is_empty() => mods,
            (_, Some(mod_list)) => mod_list,
            (Some(mods), None) => mods,
            (None, None) => {
                return Err(Error::Validation(
                    "neither `mods` nor `modList` is present in forge data".to_owned(),
                ));
            }
        };
        Ok(Self {
            network_version: raw.network_version,
            mods: mods
                .into_iter()
                .map(ForgeMod::try_from)
                .collect::<Result<_, _>>()?,
            channels: raw
                .channels
                .into_iter()
                .map(|c| ForgeChannel {
                    name: c.res,
                    version: c.version,
                    required: c.required,
                })
                .collect(),
            truncated: false,
        })
    }

    /// Decodes the packed (`d`) representation.
    ///
    /// Errors after the `truncated` flag are tolerated when the flag is set:
    /// whatever was decoded up to that point is returned.
    ///
    /// # Errors
    /// [`Error::Protocol`] if the stream is malformed and wasn't flagged as truncated.
    pub fn decode(packed: &str, network_version: u32) -> Result<Self, Error> {
        let mut buffer = unpack(packed)?;
        let truncated = buffer.read_bool()?;
        let mut data = Self {
            network_version,
            mods: Vec::new(),
            channels: Vec::new(),
            truncated,
        };

        match data.decode_lists(&mut buffer) {
            Ok(()) => {}
            Err(error) if truncated => {
                debug!(%error, mods = data.mods.len(), "keeping partial forge data from a truncated list");
            }
            Err(error @ Error::Protocol(_)) => return Err(error),
            Err(error) => return Err(Error::Protocol(error.to_string())),
        }
        Ok(data)
    }

    fn decode_lists(&mut self, buffer: &mut ByteBuffer) -> Result<(), Error> {
        let mod_count = buffer.read_ushort()?;
        for _ in 0..mod_count {
            let (forge_mod, channels) = decode_mod(buffer)?;
            self.channels.extend(channels);
            self.mods.push(forge_mod);
        }

        let non_mod_channels = buffer.read_varint()?;
        for _ in 0..non_mod_channels {
            self.channels.push(decode_channel(buffer, None)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// `minecraft` and `forge` with four channels, as sent by Forge 47 (1.20.1).
    const FORGE_1_20_1: &str = "^\u{0}\u{0}\u{804}\u{3424}\u{734b}\u{3656}\u{2e4c}\u{1998}\u{33a}\u{2e31}\u{6064}\u{44b8}\u{2851}\u{26e7}\u{6cae}\u{5a59}\u{3a39}\u{7265}\u{c08}\u{3135}\u{99a}\u{2080}\u{6cae}\u{5a59}\u{3a39}\u{7265}\u{c08}\u{3135}\u{99a}\u{5040}\u{6cc0}\u{5c9b}\u{32b3}\u{4103}\u{329c}\u{5031}\u{2b4b}\u{7726}\u{6e6b}\u{1c9b}\u{34ba}\u{676e}\u{6206}\u{40b8}\u{2801}\u{730}\u{2d8e}\u{5d1a}\u{1881}\u{312e}\u{2}";

    /// Packs bytes the way Forge's `encodeOptimized` does.
    fn pack(bytes: &[u8]) -> String {
        let mut units = vec![
            (bytes.len() & 0x7FFF) as u16,
            ((bytes.len() >> 15) & 0x7FFF) as u16,
        ];
        let mut buffer: u32 = 0;
        let mut bits = 0;
        for &byte in bytes {
            buffer |= u32::from(byte) << bits;
            bits += 8;
            if bits >= 15 {
                units.push((buffer & 0x7FFF) as u16);
                buffer >>= 15;
                bits -= 15;
            }
        }
        if bits > 0 {
            units.push((buffer & 0x7FFF) as u16);
        }
        String::from_utf16(&units).unwrap()
    }

    fn channel(name: &str, version: &str, required: bool) -> ForgeChannel {
        ForgeChannel {
            name: name.to_owned(),
            version: version.to_owned(),
            required,
        }
    }

    fn forge_mod(id: &str, marker: &str) -> ForgeMod {
        ForgeMod {
            id: id.to_owned(),
            marker: marker.to_owned(),
        }
    }

    fn write_channel(buffer: &mut ByteBuffer, name: &str, version: &str, required: bool) {
        buffer.write_utf(name).unwrap();
        buffer.write_utf(version).unwrap();
        buffer.write_bool(required);
    }

    #[test]
    fn decodes_known_forge_vector() {
        let data = ForgeData::build(&json!({
            "channels": [],
            "mods": [],
            "truncated": false,
            "fmlNetworkVersion": 3,
            "d": FORGE_1_20_1,
        }))
        .unwrap();

        assert_eq!(data.network_version, 3);
        assert!(!data.truncated);
        assert_eq!(
            data.mods,
            vec![forge_mod("minecraft", "1.20.1"), forge_mod("forge", "ANY")]
        );
        assert_eq!(
            data.channels,
            vec![
                channel("minecraft:unregister", "FML3", true),
                channel("minecraft:register", "FML3", true),
                channel("forge:tier_sorting", "1.0", false),
                channel("forge:split", "1.1", true),
            ]
        );
    }

    #[test]
    fn round_trips_mods_and_channels() {
        let mut buffer = ByteBuffer::new();
        buffer.write_bool(false);
        buffer.write_ushort(3);
        // jei: one channel
        buffer.write_varint(1 << 1);
        buffer.write_utf("jei").unwrap();
        buffer.write_utf("15.2.0.27").unwrap();
        write_channel(&mut buffer, "channel", "1.0.0", true);
        // server-only mod without a version
        buffer.write_varint(SERVER_ONLY_FLAG);
        buffer.write_utf("spark").unwrap();
        // plain mod
        buffer.write_varint(0);
        buffer.write_utf("ferritecore").unwrap();
        buffer.write_utf("6.0.1").unwrap();
        buffer.write_varint(1);
        write_channel(&mut buffer, "fml:handshake", "FML3", true);

        let data = ForgeData::decode(&pack(&buffer.flush()), 3).unwrap();
        assert_eq!(
            data,
            ForgeData {
                network_version: 3,
                mods: vec![
                    forge_mod("jei", "15.2.0.27"),
                    forge_mod("spark", NOT_REQUIRED_FOR_CLIENT),
                    forge_mod("ferritecore", "6.0.1"),
                ],
                channels: vec![
                    channel("jei:channel", "1.0.0", true),
                    channel("fml:handshake", "FML3", true),
                ],
                truncated: false,
            }
        );
    }

    fn cut_short_stream(truncated: bool) -> String {
        let mut buffer = ByteBuffer::new();
        buffer.write_bool(truncated);
        buffer.write_ushort(3);
        buffer.write_varint(0);
        buffer.write_utf("create").unwrap();
        buffer.write_utf("0.5.1").unwrap();
        // the second mod's id claims more bytes than follow
        buffer.write_varint(0);
        buffer.write_varint(40);
        buffer.write(b"flywh");
        pack(&buffer.flush())
    }

    #[test]
    fn truncated_stream_keeps_partial_lists() {
        let data = ForgeData::decode(&cut_short_stream(true), 3).unwrap();
        assert!(data.truncated);
        assert_eq!(data.mods, vec![forge_mod("create", "0.5.1")]);
        assert!(data.channels.is_empty());
    }

    #[test]
    fn malformed_stream_without_truncation_fails() {
        assert!(matches!(
            ForgeData::decode(&cut_short_stream(false), 3),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn unpack_requires_header() {
        assert!(matches!(unpack("^"), Err(Error::Protocol(_))));
        assert!(matches!(unpack("\u{7fff}\u{7fff}"), Err(Error::Protocol(_))));
    }

    #[test]
    fn builds_fml1_mod_list() {
        let data = ForgeData::build(&json!({
            "type": "FML",
            "modList": [
                {"modid": "minecraft", "version": "1.12.2"},
                {"modid": "forge", "version": "14.23.5.2859"},
            ],
            "channels": [{"res": "fml:handshake", "version": "1.2.3.4", "required": true}],
        }))
        .unwrap();
        assert_eq!(data.network_version, 1);
        assert_eq!(
            data.mods,
            vec![
                forge_mod("minecraft", "1.12.2"),
                forge_mod("forge", "14.23.5.2859")
            ]
        );
        assert_eq!(data.channels, vec![channel("fml:handshake", "1.2.3.4", true)]);
    }

    #[test]
    fn builds_fml2_mods() {
        let data = ForgeData::build(&json!({
            "fmlNetworkVersion": 2,
            "channels": [],
            "mods": [{"modId": "forge", "modmarker": "ANY"}],
        }))
        .unwrap();
        assert_eq!(data.network_version, 2);
        assert_eq!(data.mods, vec![forge_mod("forge", "ANY")]);
    }

    #[test]
    fn missing_mod_fields_are_invalid() {
        assert!(matches!(
            ForgeData::build(&json!({"mods": [{"modId": "forge"}]})),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ForgeData::build(&json!({"channels": []})),
            Err(Error::Validation(_))
        ));
    }
}
