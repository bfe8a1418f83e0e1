//! Client side of the DataStorage contract: one stored `DataItem`, two `save`
//! overloads, a `data()` getter and the `DataSaved` event.

use alloy::{dyn_abi::DynSolValue, json_abi::JsonAbi, primitives::{Address, Bytes}};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DeployError, Result};
use crate::ethereum::codec::{self, AbiCodec};
use crate::ethereum::{LogEntry, Receipt};

pub const SAVE_FIELDS: &str = "save(string,string,string)";
pub const SAVE_ITEM: &str = "save((string,string,string))";
pub const DATA_GETTER: &str = "data";
pub const DATA_SAVED: &str = "DataSaved";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    pub key: String,
    pub field: String,
    pub value: String,
}

impl DataItem {
    pub fn new<K: Into<String>, F: Into<String>, V: Into<String>>(key: K, field: F, value: V) -> Self {
        Self {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn to_values(&self) -> Vec<DynSolValue> {
        vec![
            DynSolValue::String(self.key.clone()),
            DynSolValue::String(self.field.clone()),
            DynSolValue::String(self.value.clone()),
        ]
    }

    /// Rebuilds an item from three decoded strings.
    pub fn from_values(values: &[DynSolValue], context: &str) -> Result<Self> {
        match values {
            [key, field, value] => {
                let text = |v: &DynSolValue, name: &str| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        DeployError::decode(context, format!("'{}' is not a string", name))
                    })
                };
                Ok(Self {
                    key: text(key, "key")?,
                    field: text(field, "field")?,
                    value: text(value, "value")?,
                })
            }
            _ => Err(DeployError::decode(
                context,
                format!("expected 3 values, got {}", values.len()),
            )),
        }
    }
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(key={:?}, field={:?}, value={:?})", self.key, self.field, self.value)
    }
}

/// Which `save` entry point a write goes through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveOverload {
    /// `save(string,string,string)`
    #[default]
    Fields,
    /// `save((string,string,string))`
    Item,
}

impl SaveOverload {
    pub fn signature(self) -> &'static str {
        match self {
            Self::Fields => SAVE_FIELDS,
            Self::Item => SAVE_ITEM,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataStorage {
    codec: AbiCodec,
}

impl DataStorage {
    /// Wraps an ABI after checking it exposes the whole DataStorage surface.
    pub fn new(abi: JsonAbi) -> Result<Self> {
        let codec = AbiCodec::new(abi);
        codec.function_by_signature(SAVE_FIELDS)?;
        codec.function_by_signature(SAVE_ITEM)?;
        codec.function_by_signature("data()")?;
        codec.event(DATA_SAVED)?;
        Ok(Self { codec })
    }

    pub fn encode_save(&self, item: &DataItem, overload: SaveOverload) -> Result<Bytes> {
        match overload {
            SaveOverload::Fields => self.encode_save_fields(item),
            SaveOverload::Item => self.encode_save_item(item),
        }
    }

    pub fn encode_save_fields(&self, item: &DataItem) -> Result<Bytes> {
        let function = self.codec.function_by_signature(SAVE_FIELDS)?;
        codec::encode_function(function, &item.to_values())
    }

    pub fn encode_save_item(&self, item: &DataItem) -> Result<Bytes> {
        let function = self.codec.function_by_signature(SAVE_ITEM)?;
        codec::encode_function(function, &[DynSolValue::Tuple(item.to_values())])
    }

    /// Decodes call data of either `save` overload, `None` for any other call.
    pub fn decode_save_call(&self, data: &[u8]) -> Result<Option<DataItem>> {
        let fields = self.codec.function_by_signature(SAVE_FIELDS)?;
        let item = self.codec.function_by_signature(SAVE_ITEM)?;

        if data.starts_with(fields.selector().as_slice()) {
            let values = codec::decode_input(fields, data)?;
            DataItem::from_values(&values, SAVE_FIELDS).map(Some)
        } else if data.starts_with(item.selector().as_slice()) {
            let values = codec::decode_input(item, data)?;
            let inner = values
                .first()
                .and_then(DynSolValue::as_fixed_seq)
                .ok_or_else(|| DeployError::decode(SAVE_ITEM, "argument is not a tuple"))?;
            DataItem::from_values(inner, SAVE_ITEM).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn encode_data_call(&self) -> Result<Bytes> {
        self.codec.encode_call(DATA_GETTER, &[])
    }

    pub fn decode_data(&self, output: &[u8]) -> Result<DataItem> {
        let values = self.codec.decode_return(DATA_GETTER, output)?;
        DataItem::from_values(&values, "data() return value")
    }

    /// `None` when the log is some other event.
    pub fn decode_data_saved(&self, log: &LogEntry) -> Result<Option<DataItem>> {
        match self.codec.decode_log(DATA_SAVED, &log.topics, &log.data)? {
            Some(values) => DataItem::from_values(&values, DATA_SAVED).map(Some),
            None => Ok(None),
        }
    }

    /// All `DataSaved` events `contract` emitted in `receipt`. Logs from other
    /// addresses are skipped before decoding.
    pub fn data_saved_events(&self, receipt: &Receipt, contract: Address) -> Result<Vec<DataItem>> {
        let mut items = Vec::new();
        for log in receipt.logs_from(contract) {
            if let Some(item) = self.decode_data_saved(log)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// The log the contract emits for a successful `save` of `item`.
    pub fn data_saved_log(&self, contract: Address, item: &DataItem) -> Result<LogEntry> {
        let (topics, data) = self.codec.encode_log(DATA_SAVED, &item.to_values())?;
        Ok(LogEntry {
            address: contract,
            topics,
            data,
        })
    }
}
