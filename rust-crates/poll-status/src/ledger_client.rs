use crate::{
    sources::LedgerReadSource,
    types::{
        Address,
        PollId,
    },
};
use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
    ensure,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Value,
    json,
};
use sha3::{
    Digest,
    Keccak256,
};
use std::sync::{
    Arc,
    atomic::{
        AtomicU64,
        Ordering,
    },
};

const HAS_VOTED: &str = "hasVoted(uint256,address)";
const HAS_CLAIMED: &str = "hasClaimed(uint256,address)";
const WORD: usize = 32;

/// Reads poll participation straight from the contract with `eth_call`.
#[derive(Clone)]
pub struct LedgerClient {
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

#[derive(Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorDto>,
}

#[derive(Deserialize)]
struct RpcErrorDto {
    code: i64,
    message: String,
}

/// First four bytes of the Keccak-256 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&digest[..4]);
    selector
}

/// ABI call data for `fn(uint256 poll, address account)`.
pub fn encode_call(signature: &str, poll: PollId, address: &Address) -> Result<String> {
    let raw = address.as_str().trim_start_matches("0x");
    let account = hex::decode(raw).with_context(|| format!("address {address} is not hex"))?;
    ensure!(
        account.len() == 20,
        "address {address} is {} bytes, expected 20",
        account.len()
    );

    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&selector(signature));
    let mut poll_word = [0u8; WORD];
    poll_word[WORD - 8..].copy_from_slice(&poll.0.to_be_bytes());
    data.extend_from_slice(&poll_word);
    let mut address_word = [0u8; WORD];
    address_word[WORD - 20..].copy_from_slice(&account);
    data.extend_from_slice(&address_word);
    Ok(format!("0x{}", hex::encode(data)))
}

/// A `bool` return value: one word holding exactly 0 or 1.
pub fn decode_bool(raw: &str) -> Result<bool> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))
        .with_context(|| format!("return data {raw:?} is not hex"))?;
    ensure!(
        bytes.len() == WORD,
        "expected a single 32 byte word, got {} bytes",
        bytes.len()
    );
    let (padding, last) = bytes.split_at(WORD - 1);
    if padding.iter().any(|byte| *byte != 0) {
        bail!("return word {raw} is not a boolean");
    }
    match last[0] {
        0 => Ok(false),
        1 => Ok(true),
        other => bail!("return word ends in {other}, not a boolean"),
    }
}

impl LedgerClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for ledger RPC")?;
        Ok(Self {
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call_bool(
        &self,
        rpc_endpoint: &str,
        contract: &str,
        signature: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        let data = encode_call(signature, poll, address)?;
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: json!([{ "to": contract, "data": data }, "latest"]),
        };
        let res = self
            .http
            .post(rpc_endpoint)
            .json(&request)
            .send()
            .await
            .context("ledger RPC request failed")?;
        let status = res.status();
        if !status.is_success() {
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable body>".to_string());
            bail!("ledger RPC responded with {status} calling {signature}: {body}");
        }
        let response: RpcResponse = res
            .json()
            .await
            .context("invalid ledger RPC payload")?;
        if let Some(error) = response.error {
            bail!(
                "ledger RPC error {} calling {signature}: {}",
                error.code,
                error.message
            );
        }
        let result = response
            .result
            .ok_or_else(|| anyhow!("ledger RPC returned neither result nor error"))?;
        decode_bool(&result).with_context(|| format!("decoding {signature} result"))
    }
}

impl LedgerReadSource for LedgerClient {
    async fn read_has_voted(
        &self,
        rpc_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.call_bool(rpc_endpoint, contract, HAS_VOTED, poll, address)
            .await
    }

    async fn read_has_claimed(
        &self,
        rpc_endpoint: &str,
        contract: &str,
        poll: PollId,
        address: &Address,
    ) -> Result<bool> {
        self.call_bool(rpc_endpoint, contract, HAS_CLAIMED, poll, address)
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::{
            body_partial_json,
            method,
        },
    };

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
    const ACCOUNT: &str = "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266";

    fn word(last: u8) -> String {
        format!("0x{}{:02x}", "00".repeat(31), last)
    }

    #[test]
    fn selector__matches_known_erc20_selector() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn encode_call__pads_poll_and_address_into_words() {
        // given
        let address = Address::new(ACCOUNT).unwrap();

        // when
        let data = encode_call(HAS_VOTED, PollId(5), &address).unwrap();

        // then
        let body = data.trim_start_matches("0x");
        assert_eq!(body.len(), 2 * (4 + 2 * WORD));
        assert_eq!(&body[..8], hex::encode(selector(HAS_VOTED)));
        assert_eq!(&body[8..72], format!("{}05", "0".repeat(62)));
        assert_eq!(
            &body[72..],
            format!("{}f39fd6e51aad88f6f4ce6ab8827279cfffb92266", "0".repeat(24))
        );
    }

    #[test]
    fn encode_call__short_address__is_rejected() {
        let address = Address::new("0xabc").unwrap();

        assert!(encode_call(HAS_VOTED, PollId(1), &address).is_err());
    }

    #[test]
    fn decode_bool__accepts_only_zero_or_one() {
        assert!(decode_bool(&word(1)).unwrap());
        assert!(!decode_bool(&word(0)).unwrap());
        assert!(decode_bool(&word(2)).is_err());
        assert!(decode_bool("0x01").is_err());
        assert!(decode_bool(&format!("0x01{}", "00".repeat(31))).is_err());
    }

    #[tokio::test]
    async fn read_has_voted__sends_eth_call_and_decodes_result() {
        // given
        let server = MockServer::start().await;
        let address = Address::new(ACCOUNT).unwrap();
        let data = encode_call(HAS_VOTED, PollId(3), &address).unwrap();
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_call",
                "params": [{ "to": CONTRACT, "data": data }, "latest"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": word(1)
            })))
            .mount(&server)
            .await;
        let client = LedgerClient::new().unwrap();

        // when
        let voted = client
            .read_has_voted(&server.uri(), CONTRACT, PollId(3), &address)
            .await
            .unwrap();

        // then
        assert!(voted);
    }

    #[tokio::test]
    async fn read_has_claimed__rpc_error__is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "execution reverted" }
            })))
            .mount(&server)
            .await;
        let client = LedgerClient::new().unwrap();

        let err = client
            .read_has_claimed(
                &server.uri(),
                CONTRACT,
                PollId(1),
                &Address::new(ACCOUNT).unwrap(),
            )
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("execution reverted"));
    }

    #[tokio::test]
    async fn read_has_claimed__http_failure__is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let client = LedgerClient::new().unwrap();

        let result = client
            .read_has_claimed(
                &server.uri(),
                CONTRACT,
                PollId(1),
                &Address::new(ACCOUNT).unwrap(),
            )
            .await;

        assert!(result.is_err());
    }
}
