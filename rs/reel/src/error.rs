/// How severe an error is at the point where it is reported.
///
/// Errors raised during the initial parse are fatal: there is nothing to play.
/// The same errors raised during a live refresh are recoverable by default,
/// because the presentation can keep playing whatever is already indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
	Recoverable,
	Fatal,
}

/// A list of possible errors that can occur while parsing or refreshing a presentation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
	/// The entry playlist contained neither variants nor segments.
	#[error("master playlist not provided")]
	MasterPlaylistNotProvided,

	/// A playlist of the wrong kind was found, e.g. a master playlist where a
	/// media playlist was expected.
	#[error("invalid playlist hierarchy")]
	InvalidPlaylistHierarchy,

	/// The media playlist contained no playable segments.
	#[error("empty media playlist: {0}")]
	EmptyMediaPlaylist(String),

	#[error("required tag missing: {0}")]
	RequiredTagMissing(String),

	#[error("required attribute missing: {0}")]
	RequiredAttributeMissing(String),

	/// More than one EXT-X-MAP applied to the same media segment.
	#[error("multiple media init sections found")]
	MultipleMediaInitSections,

	/// The embedder rejects live presentations.
	#[error("live content not supported")]
	LiveContentNotSupported,

	#[error("could not guess codecs")]
	CouldNotGuessCodecs,

	#[error("could not guess mime type: {0}")]
	CouldNotGuessMimeType(String),

	/// None of the EXT-X-KEY tags on a stream produced usable DRM info.
	#[error("keyformats not supported: {0}")]
	KeyformatsNotSupported(String),

	/// MPEG-2 TS cannot be decrypted by the media pipeline.
	#[error("encrypted MP2T content not supported")]
	EncryptedMp2tNotSupported,

	/// Legacy Apple Media Keys cannot be used through the media pipeline.
	#[error("encrypted content with legacy Apple Media Keys not supported")]
	EncryptedLegacyAppleMediaKeys,

	/// The METHOD of an EXT-X-KEY tag is not one the parser understands.
	#[error("unsupported cipher mode: {0}")]
	UnsupportedCipherMode(String),

	/// The IV attribute did not decode to 16 bytes.
	#[error("invalid AES initialization vector length: {0}")]
	AesInvalidIvLength(usize),

	/// The fetched AES key body had the wrong length for the cipher.
	#[error("invalid AES key length: {0}")]
	AesInvalidKeyLength(usize),

	/// A line or attribute could not be understood.
	#[error("invalid playlist: {0}")]
	InvalidPlaylist(String),

	/// The steering manifest could not be deserialized.
	#[error("invalid steering manifest: {0}")]
	Steering(String),

	/// A network request failed. The embedder owns the retry policy; this is
	/// what came back after it gave up.
	#[error("fetch failed: {0}")]
	Fetch(String),

	#[error("invalid url: {0}")]
	Url(#[from] url::ParseError),

	/// The parser was stopped while the operation was in flight.
	/// Never reported to the player callback.
	#[error("operation aborted")]
	Aborted,
}

impl Error {
	/// Abort errors are lifecycle noise, not failures.
	pub fn is_abort(&self) -> bool {
		matches!(self, Error::Aborted)
	}
}

pub type Result<T> = std::result::Result<T, Error>;
