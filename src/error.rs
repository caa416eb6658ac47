use thiserror::Error;

/// type alias for all operations on a session, UI or codec that could fail with an [`UidlError`]
pub type Result<T> = std::result::Result<T, UidlError>;

/// The error variants produced while synchronizing a connector tree with a client.
///
/// Protocol desynchronization (a client referencing a connector that no longer exists)
/// is not represented here: it is logged and the offending invocation is
/// skipped.
#[derive(Debug, Error)]
pub enum UidlError {
    /// the anti-forgery token or an upload security key did not match
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// the burst framing was corrupted, e.g. an escape character at the end of a burst
    #[error("communication error: {0}")]
    Communication(String),

    /// an escape sequence the server does not understand; client and server versions differ
    #[error(
        "invalid escaped character from the client - \
         check that the client and server versions match"
    )]
    VersionMismatch,

    /// a single value could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// serializing the response failed for one connector, which fails the whole response
    #[error("failed to paint connector {connector}: {source}")]
    Paint {
        /// id (or type name when no id exists) of the failing connector
        connector: String,
        /// the underlying failure
        #[source]
        source: Box<UidlError>,
    },

    /// an illegal connector tree operation
    #[error("illegal tree operation: {0}")]
    Tree(String),

    /// an RPC invocation could not be dispatched to application code
    #[error("rpc {interface}.{method} failed: {message}")]
    Rpc {
        /// the interface name of the invocation
        interface: String,
        /// the method name of the invocation
        method: String,
        /// description of the failure
        message: String,
    },

    /// a legacy variable change reached a connector that cannot accept it,
    /// or application code rejected the change
    #[error("variable change failed: {0}")]
    VariableChange(String),

    /// upload streaming failed with an error that is passed on to the error handlers
    #[error("upload failed: {0}")]
    Upload(String),

    /// upload streaming was interrupted by application code
    #[error("upload interrupted")]
    UploadInterrupted,

    /// the session lock could not be acquired in time
    #[error("service unavailable, retry after {retry_after_ms} ms")]
    ServiceUnavailable {
        /// suggested wait before the client retries
        retry_after_ms: u64,
    },

    /// the request arrived for a session that has already been closed
    #[error("session expired")]
    SessionExpired,

    /// the session store backend failed
    #[error("session store error: {0}")]
    Store(String),

    /// an error that is described with a message only, e.g. one re-created from a response
    #[error("{0}")]
    StringErr(String),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// serde_json error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// utf8 conversion error
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl UidlError {
    /// wraps this error with the identity of the connector being painted
    pub fn painting(self, connector: impl Into<String>) -> UidlError {
        UidlError::Paint {
            connector: connector.into(),
            source: Box::new(self),
        }
    }
}

impl From<sled::Error> for UidlError {
    fn from(e: sled::Error) -> Self {
        UidlError::Store(e.to_string())
    }
}

/// Failures of the value codec. These abort only the single value being processed, the caller
/// decides whether that aborts the whole request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// the JSON did not have the shape the declared type requires
    #[error("malformed value: expected {expected}, found {found}")]
    Malformed {
        /// what the declared type requires
        expected: String,
        /// a short rendering of what was found
        found: String,
    },

    /// a collection or map was encoded without a declared element type
    #[error("{0} is missing generics")]
    MissingGenerics(&'static str),

    /// two properties of a bean share one name
    #[error("can't encode {bean} as it has multiple properties with the name {property}")]
    DuplicateProperty {
        /// the bean type
        bean: String,
        /// the duplicated property name
        property: String,
    },

    /// a bean object was decoded without one of its declared properties
    #[error("{bean} has no value for property {property}")]
    MissingProperty {
        /// the bean type
        bean: String,
        /// the missing property
        property: String,
    },

    /// a transport tag or declared type the codec does not handle in this context
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// something other than null was sent for the null type
    #[error("something other than null was encoded for a null type")]
    NonNullForNullType,

    /// a primitive could not be parsed from its string form
    #[error("could not parse {value:?} as {transport_type}")]
    Parse {
        /// the string form of the value
        value: String,
        /// the transport type tag
        transport_type: &'static str,
    },

    /// an enum name did not match any declared variant
    #[error("{name} is not a variant of {enumeration}")]
    UnknownVariant {
        /// the enum type
        enumeration: String,
        /// the received name
        name: String,
    },
}

impl CodecError {
    pub(crate) fn malformed(expected: impl Into<String>, found: &serde_json::Value) -> CodecError {
        let rendered = found.to_string();
        let mut found: String = rendered.chars().take(40).collect();
        if found.len() < rendered.len() {
            found.push_str("...");
        }
        CodecError::Malformed {
            expected: expected.into(),
            found,
        }
    }
}
