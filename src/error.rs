//! # Error Types
//!
//! Errors surfaced by the property model, the wire codec and client setup.
//! Connection failures are not errors: the state machine turns them into
//! retries and state transitions.

/// Errors raised while registering or mutating properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PropertyError {
    /// A property with the same name is already registered in the container.
    DuplicateName,
    /// The container has no room left for another property.
    ContainerFull,
    /// No property with the requested name exists.
    UnknownProperty,
    /// The new value does not have the type the property was registered with.
    TypeMismatch,
    /// A text value exceeds [`crate::property::MAX_TEXT_LEN`].
    TextTooLong,
}

/// Errors produced by the property codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The output buffer cannot hold even the message framing.
    BufferTooSmall,
    /// The received bytes are not a well-formed property message.
    Malformed,
    /// A property name (plus schedule suffix) does not fit the name scratch buffer.
    NameTooLong,
}

impl From<minicbor::decode::Error> for CodecError {
    fn from(_: minicbor::decode::Error) -> Self {
        CodecError::Malformed
    }
}

impl<E> From<minicbor::encode::Error<E>> for CodecError {
    fn from(_: minicbor::encode::Error<E>) -> Self {
        CodecError::BufferTooSmall
    }
}

/// The primary error enum for the cloud client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CloudError {
    /// Registering or updating a property failed.
    Property(PropertyError),
    /// A derived topic name exceeds [`crate::topics::MAX_TOPIC_LEN`].
    TopicTooLong,
    /// An identifier or broker address exceeds its configured capacity.
    IdentifierTooLong,
    /// `begin()` was called on a client that is already running.
    AlreadyStarted,
}

impl From<PropertyError> for CloudError {
    fn from(err: PropertyError) -> Self {
        CloudError::Property(err)
    }
}
