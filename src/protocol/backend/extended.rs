//! Extended query protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::Reader;
use crate::protocol::types::Oid;

/// ParseComplete message - statement parsing completed.
#[derive(Debug, Clone, Copy)]
pub struct ParseComplete;

impl ParseComplete {
    /// Parse a ParseComplete message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// BindComplete message - parameter binding completed.
#[derive(Debug, Clone, Copy)]
pub struct BindComplete;

impl BindComplete {
    /// Parse a BindComplete message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// CloseComplete message - statement/portal close completed.
#[derive(Debug, Clone, Copy)]
pub struct CloseComplete;

impl CloseComplete {
    /// Parse a CloseComplete message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// NoData message - query returns no data.
#[derive(Debug, Clone, Copy)]
pub struct NoData;

impl NoData {
    /// Parse a NoData message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// PortalSuspended message - row limit reached in Execute.
#[derive(Debug, Clone, Copy)]
pub struct PortalSuspended;

impl PortalSuspended {
    /// Parse a PortalSuspended message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

/// ParameterDescription message - describes parameters for a prepared statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    /// Parameter type OIDs
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let num_params = r.read_u16()? as usize;
        let mut param_oids = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            param_oids.push(r.read_u32()?);
        }
        Ok(Self { param_oids })
    }

    /// Get the number of parameters.
    pub fn len(&self) -> usize {
        self.param_oids.len()
    }

    /// Check if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.param_oids.is_empty()
    }

    /// Get parameter type OIDs.
    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }

    /// Take ownership of the parameter OIDs.
    pub fn into_oids(self) -> Vec<Oid> {
        self.param_oids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn parse_parameter_description() {
        let mut payload = 2_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&oid::INT4.to_be_bytes());
        payload.extend_from_slice(&oid::TEXT.to_be_bytes());

        let desc = ParameterDescription::parse(&payload).unwrap();
        assert_eq!(desc.oids(), &[oid::INT4, oid::TEXT]);
    }

    #[test]
    fn truncated_parameter_description_fails() {
        let payload = 2_u16.to_be_bytes().to_vec();
        assert!(ParameterDescription::parse(&payload).is_err());
    }
}
