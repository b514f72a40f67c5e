//! Common PostgreSQL wire protocol types.

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Type OIDs from the PostgreSQL catalog (`pg_type.dat`).
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const JSON: Oid = 114;
    pub const POINT: Oid = 600;
    pub const LSEG: Oid = 601;
    pub const PATH: Oid = 602;
    pub const BOX: Oid = 603;
    pub const POLYGON: Oid = 604;
    pub const LINE: Oid = 628;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const CIRCLE: Oid = 718;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const INTERVAL: Oid = 1186;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;

    pub const BOOL_ARRAY: Oid = 1000;
    pub const BYTEA_ARRAY: Oid = 1001;
    pub const INT2_ARRAY: Oid = 1005;
    pub const INT4_ARRAY: Oid = 1007;
    pub const TEXT_ARRAY: Oid = 1009;
    pub const VARCHAR_ARRAY: Oid = 1015;
    pub const INT8_ARRAY: Oid = 1016;
    pub const POINT_ARRAY: Oid = 1017;
    pub const FLOAT4_ARRAY: Oid = 1021;
    pub const FLOAT8_ARRAY: Oid = 1022;
    pub const DATE_ARRAY: Oid = 1182;
    pub const TIME_ARRAY: Oid = 1183;
    pub const TIMESTAMP_ARRAY: Oid = 1115;
    pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
    pub const INTERVAL_ARRAY: Oid = 1187;
    pub const NUMERIC_ARRAY: Oid = 1231;
    pub const JSON_ARRAY: Oid = 199;
    pub const UUID_ARRAY: Oid = 2951;
    pub const JSONB_ARRAY: Oid = 3807;

    /// Array OID for a given element OID, if one is known.
    pub fn array_oid_for(elem: Oid) -> Option<Oid> {
        Some(match elem {
            BOOL => BOOL_ARRAY,
            BYTEA => BYTEA_ARRAY,
            INT2 => INT2_ARRAY,
            INT4 => INT4_ARRAY,
            INT8 => INT8_ARRAY,
            TEXT => TEXT_ARRAY,
            VARCHAR => VARCHAR_ARRAY,
            FLOAT4 => FLOAT4_ARRAY,
            FLOAT8 => FLOAT8_ARRAY,
            POINT => POINT_ARRAY,
            DATE => DATE_ARRAY,
            TIME => TIME_ARRAY,
            TIMESTAMP => TIMESTAMP_ARRAY,
            TIMESTAMPTZ => TIMESTAMPTZ_ARRAY,
            INTERVAL => INTERVAL_ARRAY,
            NUMERIC => NUMERIC_ARRAY,
            UUID => UUID_ARRAY,
            JSON => JSON_ARRAY,
            JSONB => JSONB_ARRAY,
            _ => return None,
        })
    }

    /// Element OID for a known array OID.
    pub fn element_oid_for(array: Oid) -> Option<Oid> {
        Some(match array {
            BOOL_ARRAY => BOOL,
            BYTEA_ARRAY => BYTEA,
            INT2_ARRAY => INT2,
            INT4_ARRAY => INT4,
            INT8_ARRAY => INT8,
            TEXT_ARRAY => TEXT,
            VARCHAR_ARRAY => VARCHAR,
            FLOAT4_ARRAY => FLOAT4,
            FLOAT8_ARRAY => FLOAT8,
            POINT_ARRAY => POINT,
            DATE_ARRAY => DATE,
            TIME_ARRAY => TIME,
            TIMESTAMP_ARRAY => TIMESTAMP,
            TIMESTAMPTZ_ARRAY => TIMESTAMPTZ,
            INTERVAL_ARRAY => INTERVAL,
            NUMERIC_ARRAY => NUMERIC,
            UUID_ARRAY => UUID,
            JSON_ARRAY => JSON,
            JSONB_ARRAY => JSONB,
            _ => return None,
        })
    }
}

/// Data format code in PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl FormatCode {
    /// Create a FormatCode from a raw u16 value.
    ///
    /// Unknown values fall back to text.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }
}

impl From<u16> for FormatCode {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

/// Transaction status indicator from ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Idle (not in transaction block)
    #[default]
    Idle = b'I',
    /// In transaction block
    InTransaction = b'T',
    /// In failed transaction block (queries will be rejected until rollback)
    Failed = b'E',
}

impl TransactionStatus {
    /// Create a TransactionStatus from a raw byte value.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (either active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::Failed
        )
    }

    /// Returns true if the transaction has failed.
    pub fn is_failed(self) -> bool {
        matches!(self, TransactionStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_status_bytes() {
        assert_eq!(
            TransactionStatus::from_byte(b'I'),
            Some(TransactionStatus::Idle)
        );
        assert_eq!(
            TransactionStatus::from_byte(b'T'),
            Some(TransactionStatus::InTransaction)
        );
        assert_eq!(
            TransactionStatus::from_byte(b'E'),
            Some(TransactionStatus::Failed)
        );
        assert_eq!(TransactionStatus::from_byte(b'x'), None);
    }

    #[test]
    fn array_oid_mapping_is_symmetric() {
        for elem in [oid::BOOL, oid::INT4, oid::TEXT, oid::UUID, oid::JSONB] {
            let arr = oid::array_oid_for(elem).unwrap();
            assert_eq!(oid::element_oid_for(arr), Some(elem));
        }
        assert_eq!(oid::array_oid_for(999_999), None);
    }
}
