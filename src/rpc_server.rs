/* Coinjoin Coordinator
 * Written by the Coinjoin Coordinator developers
 *
 * To the extent possible under law, the author(s) have dedicated all
 * copyright and related and neighboring rights to this software to
 * the public domain worldwide. This software is distributed without
 * any warranty.
 *
 * You should have received a copy of the CC0 Public Domain Dedication
 * along with this software.
 * If not, see <http://creativecommons.org/publicdomain/zero/1.0/>.
 */

//! # RPC Dispatch
//!
//! Maps JSON-RPC method names onto calls through a [`Handle`]. Params are
//! the request object of the call, by name. Protocol rejections come back
//! with code -32000 and the [`ProtocolError`] itself as error data.

use jsonrpc::error::{standard_error, RpcError, StandardError};
use phf::phf_map;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::to_raw_value;
use serde_json::Value;
use tracing::{debug, warn};

use crate::coinjoin::server::{CallError, Handle};
use crate::coinjoin::ProtocolError;

/// JSON-RPC error code for requests the coordinator rejected
pub const PROTOCOL_ERROR_CODE: i32 = -32000;

type RpcResult = Result<Value, RpcError>;

/// An incoming call
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct RpcRequest {
  /// Method name
  pub method: String,
  /// Parameters
  #[serde(default)]
  pub params: Value,
  /// Caller's id, echoed in the response
  #[serde(default)]
  pub id: Value,
}

struct RpcCall {
  name: &'static str,
  call: fn(&Handle, Value) -> RpcResult,
}

static RPC_CALLS: phf::Map<&'static str, RpcCall> = phf_map! {
  "registerinput" => RpcCall { name: "registerinput", call: registerinput },
  "confirmconnection" => RpcCall { name: "confirmconnection", call: confirmconnection },
  "registeroutput" => RpcCall { name: "registeroutput", call: registeroutput },
  "removeinput" => RpcCall { name: "removeinput", call: removeinput },
  "signtransaction" => RpcCall { name: "signtransaction", call: signtransaction },
  "getstatus" => RpcCall { name: "getstatus", call: getstatus },
};

fn registerinput(handle: &Handle, params: Value) -> RpcResult {
  invoke(handle, params, Handle::register_input)
}

fn confirmconnection(handle: &Handle, params: Value) -> RpcResult {
  invoke(handle, params, Handle::confirm_connection)
}

fn registeroutput(handle: &Handle, params: Value) -> RpcResult {
  invoke(handle, params, Handle::register_output)
}

fn removeinput(handle: &Handle, params: Value) -> RpcResult {
  invoke(handle, params, Handle::remove_input)
}

fn signtransaction(handle: &Handle, params: Value) -> RpcResult {
  invoke(handle, params, Handle::sign_transaction)
}

fn getstatus(handle: &Handle, _params: Value) -> RpcResult {
  let states = handle.round_states().map_err(call_error)?;
  encode(&states)
}

fn invoke<Req, Resp>(handle: &Handle, params: Value, f: fn(&Handle, Req) -> Result<Resp, CallError>) -> RpcResult
  where Req: DeserializeOwned,
        Resp: Serialize
{
  let request: Req = serde_json::from_value(params)
    .map_err(|e| standard_error(StandardError::InvalidParams, to_raw_value(&e.to_string()).ok()))?;
  let response = f(handle, request).map_err(call_error)?;
  encode(&response)
}

fn encode<T: Serialize>(value: &T) -> RpcResult {
  serde_json::to_value(value).map_err(|e| {
    warn!("Failed to encode response: {}", e);
    standard_error(StandardError::InternalError, None)
  })
}

fn call_error(e: CallError) -> RpcError {
  match e {
    CallError::Protocol(e) => protocol_error(&e),
    CallError::Disconnected => standard_error(StandardError::InternalError, None),
  }
}

fn protocol_error(e: &ProtocolError) -> RpcError {
  RpcError { code: PROTOCOL_ERROR_CODE, message: e.to_string(), data: to_raw_value(e).ok() }
}

fn respond(result: RpcResult, id: Value) -> jsonrpc::Response {
  match result.and_then(|value| {
    to_raw_value(&value).map_err(|_| standard_error(StandardError::InternalError, None))
  }) {
    Ok(raw) => jsonrpc::Response { result: Some(raw), error: None, id, jsonrpc: Some("2.0".to_owned()) },
    Err(e) => jsonrpc::Response { result: None, error: Some(e), id, jsonrpc: Some("2.0".to_owned()) },
  }
}

/// Dispatches one call
pub fn handle_rpc(request: RpcRequest, handle: &Handle) -> jsonrpc::Response {
  let result = match RPC_CALLS.get(request.method.as_str()) {
    Some(rpc) => {
      debug!("RPC call {}", rpc.name);
      (rpc.call)(handle, request.params)
    }
    None => Err(standard_error(StandardError::MethodNotFound, to_raw_value(&request.method).ok())),
  };
  respond(result, request.id)
}

/// Parses and dispatches one call given as JSON text
pub fn handle_json(text: &str, handle: &Handle) -> jsonrpc::Response {
  match serde_json::from_str::<RpcRequest>(text) {
    Ok(request) => handle_rpc(request, handle),
    Err(e) => respond(Err(standard_error(StandardError::ParseError, to_raw_value(&e.to_string()).ok())),
                      Value::Null),
  }
}
