//! Request-variant semantics.
//!
//! Each command's four request types `R1..R4` pack two booleans. The
//! packing is wire-visible and frozen:
//!
//! | Command | R1 | R2 | R3 | R4 |
//! |---|---|---|---|---|
//! | PUT | overwrite | overwrite + protect domain | if-absent | if-absent + protect domain |
//! | ADD | hashed | hashed + protect domain | list | list + protect domain |
//! | GET/DIGEST | ascending | ascending + bloom | descending | descending + bloom |
//! | REMOVE | no echo | echo removed data | (unused) | (unused) |
//!
//! Handlers decode the variant into one of these structs on ingress and
//! never look at the raw type again.

use stash_proto::MessageType;

use crate::RpcError;

/// PUT variant: overwrite policy and domain claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutSemantics {
    /// Refuse to overwrite an existing entry
    pub put_if_absent: bool,
    /// Claim the target bucket for the message's public key
    pub protect_domain: bool,
}

impl PutSemantics {
    /// Decodes a request type.
    pub fn from_type(mtype: MessageType) -> Result<Self, RpcError> {
        let (put_if_absent, protect_domain) = match mtype {
            MessageType::Request1 => (false, false),
            MessageType::Request2 => (false, true),
            MessageType::Request3 => (true, false),
            MessageType::Request4 => (true, true),
            other => return Err(RpcError::malformed(format!("{other:?} is not a PUT variant"))),
        };
        Ok(Self {
            put_if_absent,
            protect_domain,
        })
    }

    /// The request type carrying these semantics.
    pub fn to_type(&self) -> MessageType {
        match (self.put_if_absent, self.protect_domain) {
            (false, false) => MessageType::Request1,
            (false, true) => MessageType::Request2,
            (true, false) => MessageType::Request3,
            (true, true) => MessageType::Request4,
        }
    }
}

/// ADD variant: content-key policy and domain claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddSemantics {
    /// List mode: the server rolls fresh random content keys so equal
    /// payloads stay distinct entries
    pub list: bool,
    /// Claim the target bucket for the message's public key
    pub protect_domain: bool,
}

impl AddSemantics {
    /// Decodes a request type.
    pub fn from_type(mtype: MessageType) -> Result<Self, RpcError> {
        let (list, protect_domain) = match mtype {
            MessageType::Request1 => (false, false),
            MessageType::Request2 => (false, true),
            MessageType::Request3 => (true, false),
            MessageType::Request4 => (true, true),
            other => return Err(RpcError::malformed(format!("{other:?} is not an ADD variant"))),
        };
        Ok(Self {
            list,
            protect_domain,
        })
    }

    /// The request type carrying these semantics.
    pub fn to_type(&self) -> MessageType {
        match (self.list, self.protect_domain) {
            (false, false) => MessageType::Request1,
            (false, true) => MessageType::Request2,
            (true, false) => MessageType::Request3,
            (true, true) => MessageType::Request4,
        }
    }
}

/// GET and DIGEST variant: scan direction and digest shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySemantics {
    /// Scan the key range in ascending order
    pub ascending: bool,
    /// Summarize the digest as bloom filters instead of a key map
    pub return_bloom: bool,
}

impl QuerySemantics {
    /// Decodes a request type.
    pub fn from_type(mtype: MessageType) -> Result<Self, RpcError> {
        let (ascending, return_bloom) = match mtype {
            MessageType::Request1 => (true, false),
            MessageType::Request2 => (true, true),
            MessageType::Request3 => (false, false),
            MessageType::Request4 => (false, true),
            other => {
                return Err(RpcError::malformed(format!(
                    "{other:?} is not a query variant"
                )))
            }
        };
        Ok(Self {
            ascending,
            return_bloom,
        })
    }

    /// The request type carrying these semantics.
    pub fn to_type(&self) -> MessageType {
        match (self.ascending, self.return_bloom) {
            (true, false) => MessageType::Request1,
            (true, true) => MessageType::Request2,
            (false, false) => MessageType::Request3,
            (false, true) => MessageType::Request4,
        }
    }
}

/// REMOVE variant: whether removed entries travel back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveSemantics {
    /// Echo the removed entries in the response
    pub echo_results: bool,
}

impl RemoveSemantics {
    /// Decodes a request type. REMOVE only uses the first two variants.
    pub fn from_type(mtype: MessageType) -> Result<Self, RpcError> {
        match mtype {
            MessageType::Request1 => Ok(Self {
                echo_results: false,
            }),
            MessageType::Request2 => Ok(Self { echo_results: true }),
            other => Err(RpcError::malformed(format!(
                "{other:?} is not a REMOVE variant"
            ))),
        }
    }

    /// The request type carrying these semantics.
    pub fn to_type(&self) -> MessageType {
        if self.echo_results {
            MessageType::Request2
        } else {
            MessageType::Request1
        }
    }
}
