//! Form selections and their legal combinations.
//!
//! The response type a user may pick depends on the transaction type. The mapping
//! is a total function over [`TransactionType`], and [`FormState`] re-validates the
//! stored response type on every upstream change instead of trusting it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of business document being submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionType {
    /// Purchase order
    #[default]
    #[serde(rename = "ORDER")]
    Order,
    /// Advance ship notice
    #[serde(rename = "ASN")]
    Asn,
    /// Item record
    #[serde(rename = "ITEM")]
    Item,
    /// Schema-only request, no input file
    #[serde(rename = "GETSCHEMA")]
    GetSchema,
}

impl TransactionType {
    pub const ALL: [TransactionType; 4] = [
        TransactionType::Order,
        TransactionType::Asn,
        TransactionType::Item,
        TransactionType::GetSchema,
    ];

    /// Response types that are legal for this transaction type.
    ///
    /// The first element is the default selected after a transaction type change.
    pub fn legal_response_types(self) -> &'static [ResponseType] {
        match self {
            TransactionType::Order => &[ResponseType::Ack, ResponseType::ShipConfirm],
            TransactionType::Asn => &[ResponseType::Ack, ResponseType::Receipt],
            TransactionType::Item => &[ResponseType::Ack],
            TransactionType::GetSchema => &[
                ResponseType::Asn,
                ResponseType::Order,
                ResponseType::ShipConfirm,
                ResponseType::Receipt,
                ResponseType::Item,
            ],
        }
    }

    /// Whether submitting this transaction type needs an input file.
    pub fn requires_file(self) -> bool {
        !matches!(self, TransactionType::GetSchema)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Order => write!(f, "ORDER"),
            TransactionType::Asn => write!(f, "ASN"),
            TransactionType::Item => write!(f, "ITEM"),
            TransactionType::GetSchema => write!(f, "GETSCHEMA"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ORDER" => Ok(TransactionType::Order),
            "ASN" => Ok(TransactionType::Asn),
            "ITEM" => Ok(TransactionType::Item),
            "GETSCHEMA" => Ok(TransactionType::GetSchema),
            _ => Err(format!("Invalid transaction type: {}", s)),
        }
    }
}

/// Shipment mode of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    #[serde(rename = "LTL")]
    Ltl,
    #[serde(rename = "PARCEL")]
    Parcel,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Ltl => write!(f, "LTL"),
            OrderType::Parcel => write!(f, "PARCEL"),
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LTL" => Ok(OrderType::Ltl),
            "PARCEL" => Ok(OrderType::Parcel),
            _ => Err(format!("Invalid order type: {}", s)),
        }
    }
}

/// Serialization of the input file and the generated artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FormatType {
    #[default]
    #[serde(rename = "EDI")]
    Edi,
    #[serde(rename = "JSON")]
    Json,
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatType::Edi => write!(f, "EDI"),
            FormatType::Json => write!(f, "JSON"),
        }
    }
}

impl FromStr for FormatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EDI" => Ok(FormatType::Edi),
            "JSON" => Ok(FormatType::Json),
            _ => Err(format!("Invalid format: {}", s)),
        }
    }
}

/// Kind of document the backend is expected to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "SHIPCONFIRM")]
    ShipConfirm,
    #[serde(rename = "RECEIPT")]
    Receipt,
    #[serde(rename = "ASN")]
    Asn,
    #[serde(rename = "ORDER")]
    Order,
    #[serde(rename = "ITEM")]
    Item,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseType::Ack => write!(f, "ACK"),
            ResponseType::ShipConfirm => write!(f, "SHIPCONFIRM"),
            ResponseType::Receipt => write!(f, "RECEIPT"),
            ResponseType::Asn => write!(f, "ASN"),
            ResponseType::Order => write!(f, "ORDER"),
            ResponseType::Item => write!(f, "ITEM"),
        }
    }
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACK" => Ok(ResponseType::Ack),
            // Older backends spell it SHIPCONF
            "SHIPCONFIRM" | "SHIPCONF" => Ok(ResponseType::ShipConfirm),
            "RECEIPT" => Ok(ResponseType::Receipt),
            "ASN" => Ok(ResponseType::Asn),
            "ORDER" => Ok(ResponseType::Order),
            "ITEM" => Ok(ResponseType::Item),
            _ => Err(format!("Invalid response type: {}", s)),
        }
    }
}

/// Current form selections.
///
/// Fields are private so every mutation goes through the transition methods,
/// which keep the response type inside the legal set for the transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormState {
    transaction_type: TransactionType,
    order_type: OrderType,
    format: FormatType,
    response_type: ResponseType,
}

/// What a transaction type change did besides updating the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionChange {
    /// The response type was illegal under the new transaction type and was reset.
    pub response_type_reset: bool,
    /// The new transaction type needs no file, so any staged file must be discarded.
    pub discard_file: bool,
}

impl Default for FormState {
    fn default() -> Self {
        let transaction_type = TransactionType::default();
        Self {
            transaction_type,
            order_type: OrderType::default(),
            format: FormatType::default(),
            response_type: transaction_type.legal_response_types()[0],
        }
    }
}

impl FormState {
    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn format(&self) -> FormatType {
        self.format
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Response types selectable under the current transaction type.
    pub fn legal_response_types(&self) -> &'static [ResponseType] {
        self.transaction_type.legal_response_types()
    }

    /// Whether the current selection needs an input file.
    pub fn requires_file(&self) -> bool {
        self.transaction_type.requires_file()
    }

    /// Whether the order type is part of the current selection.
    ///
    /// It applies to orders, and to schema requests for the order document.
    pub fn order_type_applicable(&self) -> bool {
        match self.transaction_type {
            TransactionType::Order => true,
            TransactionType::GetSchema => self.response_type == ResponseType::Order,
            _ => false,
        }
    }

    /// Whether the file picker and drop zone are disabled.
    pub fn is_file_input_disabled(&self) -> bool {
        !self.requires_file()
    }

    /// Change the transaction type.
    ///
    /// Resets the order type when switching to orders, resets the response type to
    /// the first legal one if it became illegal, and reports whether a staged file
    /// must be discarded.
    pub fn set_transaction_type(&mut self, transaction_type: TransactionType) -> TransactionChange {
        self.transaction_type = transaction_type;

        if transaction_type == TransactionType::Order {
            self.order_type = OrderType::default();
        }

        let legal = transaction_type.legal_response_types();
        let response_type_reset = !legal.contains(&self.response_type);
        if response_type_reset {
            self.response_type = legal[0];
        }

        TransactionChange {
            response_type_reset,
            discard_file: !transaction_type.requires_file(),
        }
    }

    /// Change the response type.
    ///
    /// Returns false and leaves the selection untouched if the response type is not
    /// legal for the current transaction type.
    pub fn set_response_type(&mut self, response_type: ResponseType) -> bool {
        if !self.legal_response_types().contains(&response_type) {
            return false;
        }
        self.response_type = response_type;
        if self.transaction_type == TransactionType::GetSchema
            && response_type == ResponseType::Order
        {
            self.order_type = OrderType::default();
        }
        true
    }

    pub fn set_order_type(&mut self, order_type: OrderType) {
        self.order_type = order_type;
    }

    pub fn set_format(&mut self, format: FormatType) {
        self.format = format;
    }
}
