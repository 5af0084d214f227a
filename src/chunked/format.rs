use base64::{Engine, engine::general_purpose::STANDARD as b64};
use serde::{Deserialize, Deserializer, de};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::{U32, U64},
};

// tar-split: one JSON object per line, either a file (name + size) or a raw segment (payload)
#[derive(Debug, Deserialize)]
pub struct TarSplitEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "base64_payload")]
    pub payload: Option<Box<[u8]>>,
}

fn base64_payload<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Box<[u8]>>, D::Error> {
    let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    b64.decode(encoded)
        .map(|bytes| Some(bytes.into_boxed_slice()))
        .map_err(de::Error::custom)
}

// manifest: the CRFS-style table of contents
#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub offset: Option<u64>,
    pub end_offset: Option<u64>,
}

/// Location of one zstd frame, as recorded in the footer.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Unaligned, KnownLayout, Immutable)]
pub struct FrameRef {
    pub offset: U64,
    pub compressed_len: U64,
    pub uncompressed_len: U64,
}

/// The skippable zstd frame which ends every zstd:chunked file.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Unaligned, KnownLayout, Immutable)]
pub struct Footer {
    pub skippable_magic: [u8; 4],
    pub skippable_size: U32,
    pub manifest: FrameRef,
    pub manifest_type: U64,
    pub tarsplit: FrameRef,
    pub magic: [u8; 8],
}

impl Footer {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub const SKIPPABLE_MAGIC: [u8; 4] = [0x50, 0x2a, 0x4d, 0x18];
    pub const BODY_SIZE: u32 = 64;
    pub const MANIFEST_TYPE: u64 = 1;
    pub const MAGIC: [u8; 8] = *b"GNUlInUx";

    /// Finds the footer at the end of `tail`, which must be at least [`Footer::SIZE`] bytes of
    /// the end of the file.
    pub fn from_tail(tail: &[u8]) -> Option<&Self> {
        let (_rest, footer) = Self::ref_from_suffix(tail).ok()?;
        footer.is_valid().then_some(footer)
    }

    fn is_valid(&self) -> bool {
        self.skippable_magic == Self::SKIPPABLE_MAGIC
            && self.skippable_size == Self::BODY_SIZE
            && self.manifest_type == Self::MANIFEST_TYPE
            && self.magic == Self::MAGIC
    }
}
