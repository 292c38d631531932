use core::fmt;

/// The outcome of a request, either returned synchronously by a request
/// entry point or delivered to the request's completion callback.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone)]
pub enum Status {
    /// The request was carried out.
    Success = 0,
    /// The request was rejected: the request queue is full, the node id is
    /// unknown, the node is not in a state the request applies to, or a
    /// slot collision could not be resolved.
    Failure = 1,
    /// The request was accepted and its result is pending.
    Busy = 2,
}

impl Status {
    /// Get the name of the variant.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::Busy => "Busy",
        }
    }

    /// Convert a raw value previously obtained by `status as u8`.
    #[inline]
    pub const fn from_u8(x: u8) -> Option<Self> {
        match x {
            0 => Some(Self::Success),
            1 => Some(Self::Failure),
            2 => Some(Self::Busy),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "the request succeeded",
            Self::Failure => "the request failed",
            Self::Busy => "the request is pending",
        })
    }
}

impl From<Status> for u8 {
    #[inline]
    fn from(x: Status) -> Self {
        x as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values() {
        for s in [Status::Success, Status::Failure, Status::Busy] {
            assert_eq!(Status::from_u8(u8::from(s)), Some(s));
        }
        assert_eq!(Status::from_u8(3), None);
    }
}
