use thiserror::Error;

pub type XmatchResult<T> = Result<T, XmatchError>;

#[derive(Debug, Error)]
pub enum XmatchError {
    #[error("Unsupported HEALPix order {order} (maximum {max})")]
    InvalidOrder { order: u32, max: u32 },

    #[error("Pixel {pixel} out of range for HEALPix order {order}")]
    InvalidPixel { pixel: u64, order: u32 },

    #[error("Invalid polygon: {message}")]
    InvalidPolygon { message: String },

    #[error("Invalid tolerance: {message}")]
    InvalidTolerance { message: String },

    #[error("Non-finite coordinate ({ra}, {dec})")]
    NonFinite { ra: f64, dec: f64 },
}

impl XmatchError {
    pub fn invalid_order(order: u32) -> Self {
        Self::InvalidOrder {
            order,
            max: crate::healpix::MAX_ORDER,
        }
    }

    pub fn invalid_pixel(pixel: u64, order: u32) -> Self {
        Self::InvalidPixel { pixel, order }
    }

    pub fn invalid_polygon(message: impl Into<String>) -> Self {
        Self::InvalidPolygon {
            message: message.into(),
        }
    }

    pub fn invalid_tolerance(message: impl Into<String>) -> Self {
        Self::InvalidTolerance {
            message: message.into(),
        }
    }

    pub fn non_finite(ra: f64, dec: f64) -> Self {
        Self::NonFinite { ra, dec }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_order_mentions_limit() {
        let err = XmatchError::invalid_order(31);
        let msg = err.to_string();
        assert!(msg.contains("31"));
        assert!(msg.contains("29"));
    }

    #[test]
    fn test_invalid_pixel() {
        let err = XmatchError::invalid_pixel(48, 1);
        assert!(err.to_string().contains("48"));
    }

    #[test]
    fn test_invalid_polygon() {
        let err = XmatchError::invalid_polygon("need at least 3 vertices");
        assert!(err.to_string().contains("at least 3 vertices"));
    }
}
