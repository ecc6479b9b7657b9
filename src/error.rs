use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("leb128 value needs more than 8 bytes to encode canonically")]
    Leb128TooLong,
    #[error("leb128 byte sequence truncated before continuation bit cleared")]
    Leb128Truncated,

    #[error("OBU forbidden bit is set")]
    ForbiddenBitSet,
    #[error("OBU data is empty")]
    EmptyObuData,
    #[error("OBU extension header reserved bits are not zero")]
    InvalidExtensionReserved,
    #[error("payload is too small for OBU extension header")]
    ErrPayloadTooSmallForObuExtensionHeader,
    #[error("OBU payload size extends past the end of the buffer")]
    ObuPayloadTruncated,

    #[error("aggregation header reserved bit is set")]
    InvalidAggregationHeaderReserved,
    #[error("aggregation header W field out of range 0..=3")]
    InvalidW,

    #[error("scalability structure N_S out of range")]
    InvalidNs,
    #[error("scalability structure N_G out of range")]
    InvalidNg,
    #[error("spatial layer descriptor count does not match N_S + 1")]
    SpatialLayerCountMismatch,
    #[error("scalability structure truncated inside spatial layer descriptors")]
    IncompleteSpatialLayers,
    #[error("scalability structure truncated inside picture descriptors")]
    IncompletePictureDescriptors,
    #[error("scalability structure would encode to more than 255 bytes")]
    ScalabilityStructureTooLarge,

    #[error("invalid LEB128 in OBU stream: {0}")]
    InvalidLeb128(&'static str),
    #[error("OBU declared size {expected} but only {actual} bytes remain")]
    IncompleteObu { expected: usize, actual: usize },
    #[error("zero-length OBU")]
    ZeroLengthObu,
    #[error("OBU size {size} exceeds maximum of {max}")]
    ObuTooLarge { size: usize, max: usize },
    #[error("malformed OBU header: {0}")]
    MalformedHeader(&'static str),
    #[error("partial OBU of {size} bytes at access unit boundary")]
    PartialObuAtBoundary { size: usize },

    #[error("fmtp profile/tier combination is invalid")]
    FmtpInvalidProfileTier,
    #[error("fmtp level-idx {0} has no canonical level string")]
    FmtpUnknownLevelIndex(u8),
    #[error("fmtp field `{0}` is not a valid integer")]
    FmtpInvalidInteger(String),
    #[error("fmtp ss-data is not valid hex")]
    FmtpInvalidSsData,

    #[error("mtu too small to carry an aggregation header")]
    MtuTooSmall,
    #[error("AV1 RTP clock rate must be 90000, got {0}")]
    UnsupportedClockRate(u32),
    #[error("draft aggregation header mode (legacy S E F C layout) is not implemented by this crate")]
    UnsupportedHeaderMode,
}
