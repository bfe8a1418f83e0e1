//! ABI encoding and decoding against a runtime [`JsonAbi`].
//!
//! Call data is `selector ++ head ++ tail`: every parameter owns one 32-byte
//! head slot, and dynamic parameters (strings, bytes, dynamic tuples) store an
//! offset in that slot pointing into the tail, where the length-prefixed,
//! right-padded payload lives. The heavy lifting is delegated to
//! `alloy::dyn_abi`; this module picks the right descriptor, type-checks the
//! arguments against it, and turns failures into [`DeployError`]s.

use alloy::{
    dyn_abi::{DynSolValue, EventExt, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Event, Function, JsonAbi, Param},
    primitives::{keccak256, Bytes, B256},
};

use crate::error::{DeployError, Result};
use crate::ethereum::utils;

#[derive(Debug, Clone)]
pub struct AbiCodec {
    abi: JsonAbi,
}

impl AbiCodec {
    pub fn new(abi: JsonAbi) -> Self {
        Self { abi }
    }

    /// Finds the overload of `name` whose parameter list accepts `args`.
    pub fn resolve_function(&self, name: &str, args: &[DynSolValue]) -> Result<&Function> {
        utils::validate_function_name(name)?;
        let overloads = self
            .abi
            .function(name)
            .ok_or_else(|| DeployError::UnknownFunction(name.to_string()))?;

        let mut reasons = Vec::new();
        for function in overloads {
            match check_arguments(&function.inputs, args) {
                Ok(()) => return Ok(function),
                Err(reason) => reasons.push(format!("{}: {}", function.signature(), reason)),
            }
        }

        Err(DeployError::SignatureMismatch {
            function: name.to_string(),
            reason: reasons.join("; "),
        })
    }

    /// Looks a function up by its canonical signature, e.g. `save(string,string,string)`.
    pub fn function_by_signature(&self, signature: &str) -> Result<&Function> {
        self.abi
            .functions()
            .find(|f| f.signature() == signature)
            .ok_or_else(|| DeployError::UnknownFunction(signature.to_string()))
    }

    pub fn encode_call(&self, name: &str, args: &[DynSolValue]) -> Result<Bytes> {
        let function = self.resolve_function(name, args)?;
        encode_function(function, args)
    }

    /// Creation payload: bytecode followed by the encoded constructor arguments.
    pub fn encode_deploy(&self, bytecode: &Bytes, args: &[DynSolValue]) -> Result<Bytes> {
        let mut data = bytecode.to_vec();

        match self.abi.constructor() {
            Some(constructor) => {
                check_arguments(&constructor.inputs, args).map_err(|reason| {
                    DeployError::SignatureMismatch {
                        function: "constructor".to_string(),
                        reason,
                    }
                })?;
                let encoded = constructor.abi_encode_input(args).map_err(|e| {
                    DeployError::SignatureMismatch {
                        function: "constructor".to_string(),
                        reason: e.to_string(),
                    }
                })?;
                data.extend_from_slice(&encoded);
            }
            None if !args.is_empty() => {
                return Err(DeployError::SignatureMismatch {
                    function: "constructor".to_string(),
                    reason: format!("contract has no constructor but {} arguments given", args.len()),
                });
            }
            None => {}
        }

        Ok(data.into())
    }

    /// Decodes the return data of the first function named `name`.
    pub fn decode_return(&self, name: &str, data: &[u8]) -> Result<Vec<DynSolValue>> {
        let function = self
            .abi
            .function(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| DeployError::UnknownFunction(name.to_string()))?;
        decode_output(function, data)
    }

    pub fn event(&self, name: &str) -> Result<&Event> {
        self.abi
            .event(name)
            .and_then(|events| events.first())
            .ok_or_else(|| DeployError::UnknownEvent(name.to_string()))
    }

    /// Decodes a log as event `name`, returning its fields in declaration order.
    ///
    /// Returns `Ok(None)` when the first topic is not the event's signature
    /// hash: the log belongs to some other event.
    pub fn decode_log(
        &self,
        name: &str,
        topics: &[B256],
        data: &[u8],
    ) -> Result<Option<Vec<DynSolValue>>> {
        let event = self.event(name)?;

        if !event.anonymous && topics.first() != Some(&event.selector()) {
            return Ok(None);
        }

        let decoded = event
            .decode_log_parts(topics.iter().copied(), data, false)
            .map_err(|e| DeployError::decode(format!("event {}", event.signature()), e))?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut fields = Vec::with_capacity(event.inputs.len());
        for input in &event.inputs {
            let next = if input.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let value = next.ok_or_else(|| {
                DeployError::decode(
                    format!("event {}", event.signature()),
                    format!("missing field '{}'", input.name),
                )
            })?;
            fields.push(value);
        }

        Ok(Some(fields))
    }

    /// Builds the topics and data a contract emits for event `name` with the
    /// given field values. Indexed dynamic values are stored as their hash.
    pub fn encode_log(&self, name: &str, values: &[DynSolValue]) -> Result<(Vec<B256>, Bytes)> {
        let event = self.event(name)?;
        if event.inputs.len() != values.len() {
            return Err(DeployError::SignatureMismatch {
                function: event.signature(),
                reason: format!("expected {} fields, got {}", event.inputs.len(), values.len()),
            });
        }

        let mut topics = Vec::new();
        if !event.anonymous {
            topics.push(event.selector());
        }

        let mut body = Vec::new();
        for (input, value) in event.inputs.iter().zip(values) {
            if input.indexed {
                let topic = match value.as_word() {
                    Some(word) => word,
                    None => keccak256(value.abi_encode_packed()),
                };
                topics.push(topic);
            } else {
                body.push(value.clone());
            }
        }

        let data = DynSolValue::Tuple(body).abi_encode_params();
        Ok((topics, data.into()))
    }
}

pub fn encode_function(function: &Function, args: &[DynSolValue]) -> Result<Bytes> {
    check_arguments(&function.inputs, args).map_err(|reason| DeployError::SignatureMismatch {
        function: function.signature(),
        reason,
    })?;

    let encoded = function
        .abi_encode_input(args)
        .map_err(|e| DeployError::SignatureMismatch {
            function: function.signature(),
            reason: e.to_string(),
        })?;

    Ok(encoded.into())
}

pub fn decode_output(function: &Function, data: &[u8]) -> Result<Vec<DynSolValue>> {
    if data.is_empty() && !function.outputs.is_empty() {
        return Err(DeployError::decode(
            format!("return data of {}", function.signature()),
            "empty return data",
        ));
    }

    function
        .abi_decode_output(data, false)
        .map_err(|e| DeployError::decode(format!("return data of {}", function.signature()), e))
}

/// Decodes call data (selector included) against `function`.
pub fn decode_input(function: &Function, data: &[u8]) -> Result<Vec<DynSolValue>> {
    let context = format!("call data of {}", function.signature());
    let (selector, params) = data
        .split_first_chunk::<4>()
        .ok_or_else(|| DeployError::decode(&context, "shorter than a selector"))?;

    if selector != &function.selector().0 {
        return Err(DeployError::decode(&context, "selector mismatch"));
    }

    function
        .abi_decode_input(params, false)
        .map_err(|e| DeployError::decode(context, e))
}

fn check_arguments(params: &[Param], args: &[DynSolValue]) -> std::result::Result<(), String> {
    if params.len() != args.len() {
        return Err(format!(
            "expected {} arguments, got {}",
            params.len(),
            args.len()
        ));
    }

    for (i, (param, arg)) in params.iter().zip(args).enumerate() {
        let ty = param
            .resolve()
            .map_err(|e| format!("parameter #{} has unsupported type: {}", i + 1, e))?;
        if !ty.matches(arg) {
            let given = arg
                .as_type()
                .map(|t| t.sol_type_name().into_owned())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(format!(
                "parameter #{} ('{}') expects {}, got {}",
                i + 1,
                param.name,
                ty.sol_type_name(),
                given
            ));
        }
    }

    Ok(())
}
