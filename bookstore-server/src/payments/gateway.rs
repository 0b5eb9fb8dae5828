//! Payment gateway adapters
//!
//! Each adapter knows its gateway's parameter names, amount encoding,
//! result codes and acknowledgement bodies. Signing is delegated to
//! [`signer`](super::signer).

use super::signer::{self, HashAlgo, Params};
use super::{PaymentError, PaymentResult};
use crate::config::{MomoConfig, VnpayConfig};
use chrono::{DateTime, FixedOffset};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Value, json};
use shared::models::{Order, Payment, PaymentMethod};

/// Gateway result of a payment attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success,
    /// The customer abandoned the payment page
    Cancelled,
    Failed { code: String },
}

impl CallbackOutcome {
    pub fn label(&self) -> String {
        match self {
            Self::Success => "success".into(),
            Self::Cancelled => "cancelled".into(),
            Self::Failed { code } => format!("failed:{code}"),
        }
    }
}

/// Callback fields after signature verification
#[derive(Debug, Clone)]
pub struct ParsedCallback {
    pub txn_ref: String,
    /// Amount exactly as the gateway encodes it
    pub amount: String,
    pub outcome: CallbackOutcome,
    pub transaction_no: Option<String>,
}

/// What we tell the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Confirmed,
    AlreadyConfirmed,
    InvalidSignature,
    UnknownPayment,
    AmountMismatch,
}

pub trait GatewayAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Signed redirect URL for the customer
    fn payment_url(&self, payment: &Payment, order: &Order, client_ip: Option<&str>, now: i64) -> String;

    /// Our transaction reference as echoed in a callback
    fn txn_ref<'a>(&self, params: &'a Params) -> Option<&'a str>;

    fn verify(&self, params: &Params) -> bool;

    fn parse(&self, params: &Params) -> PaymentResult<ParsedCallback>;

    /// Amount in the gateway's own encoding
    fn encode_amount(&self, amount: Decimal) -> String;

    fn ack(&self, ack: Ack) -> Value;
}

fn required<'a>(params: &'a Params, key: &str) -> PaymentResult<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PaymentError::InvalidCallback(format!("missing {key}")))
}

/// Integer amount in minor units (`scale` = 10^digits)
fn minor_units(amount: Decimal, scale: i64) -> String {
    (amount * Decimal::from(scale))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
        .to_string()
}

/// VNPay wall clock (UTC+7)
fn vn_time(now_ms: i64) -> String {
    let offset = FixedOffset::east_opt(7 * 3600);
    DateTime::from_timestamp_millis(now_ms)
        .zip(offset)
        .map(|(t, tz)| t.with_timezone(&tz).format("%Y%m%d%H%M%S").to_string())
        .unwrap_or_default()
}

// =============================================================================
// VNPay
// =============================================================================

const VNP_HASH: &str = "vnp_SecureHash";
const VNP_HASH_TYPE: &str = "vnp_SecureHashType";

pub struct VnpayGateway {
    config: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> Self {
        Self { config }
    }

    fn unsigned(params: &Params) -> Params {
        params
            .iter()
            .filter(|(k, _)| k.as_str() != VNP_HASH && k.as_str() != VNP_HASH_TYPE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Sign `params` the way VNPay signs its callbacks (test helper and
    /// reconciliation tooling)
    pub fn sign_params(&self, params: &mut Params) {
        let sig = signer::sign(&Self::unsigned(params), &self.config.hash_secret, HashAlgo::Sha512);
        params.insert(VNP_HASH.into(), sig);
    }
}

impl GatewayAdapter for VnpayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Vnpay
    }

    fn payment_url(&self, payment: &Payment, order: &Order, client_ip: Option<&str>, now: i64) -> String {
        let mut params: Params = [
            ("vnp_Version", "2.1.0".to_string()),
            ("vnp_Command", "pay".into()),
            ("vnp_TmnCode", self.config.tmn_code.clone()),
            ("vnp_Amount", self.encode_amount(payment.amount)),
            ("vnp_CurrCode", "VND".into()),
            ("vnp_TxnRef", payment.gateway_txn_ref.clone()),
            ("vnp_OrderInfo", format!("Payment for order {}", order.order_number)),
            ("vnp_OrderType", "other".into()),
            ("vnp_Locale", "vn".into()),
            ("vnp_ReturnUrl", self.config.return_url.clone()),
            ("vnp_IpAddr", client_ip.unwrap_or("127.0.0.1").to_string()),
            ("vnp_CreateDate", vn_time(now)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        self.sign_params(&mut params);
        format!("{}?{}", self.config.pay_url, signer::canonicalize(&params))
    }

    fn txn_ref<'a>(&self, params: &'a Params) -> Option<&'a str> {
        params.get("vnp_TxnRef").map(String::as_str)
    }

    fn verify(&self, params: &Params) -> bool {
        let Some(sig) = params.get(VNP_HASH) else {
            return false;
        };
        signer::verify(&Self::unsigned(params), &self.config.hash_secret, HashAlgo::Sha512, sig)
    }

    fn parse(&self, params: &Params) -> PaymentResult<ParsedCallback> {
        let response = required(params, "vnp_ResponseCode")?;
        // vnp_TransactionStatus is absent on some older integrations
        let status = params.get("vnp_TransactionStatus").map_or(response, String::as_str);
        let outcome = match (response, status) {
            ("00", "00") => CallbackOutcome::Success,
            ("24", _) => CallbackOutcome::Cancelled,
            (code, _) => CallbackOutcome::Failed { code: code.to_string() },
        };
        Ok(ParsedCallback {
            txn_ref: required(params, "vnp_TxnRef")?.to_string(),
            amount: required(params, "vnp_Amount")?.to_string(),
            outcome,
            transaction_no: params.get("vnp_TransactionNo").filter(|v| !v.is_empty()).cloned(),
        })
    }

    fn encode_amount(&self, amount: Decimal) -> String {
        minor_units(amount, 100)
    }

    fn ack(&self, ack: Ack) -> Value {
        let (code, message) = match ack {
            Ack::Confirmed => ("00", "Confirm Success"),
            Ack::AlreadyConfirmed => ("02", "Order already confirmed"),
            Ack::InvalidSignature => ("97", "Invalid Checksum"),
            Ack::UnknownPayment => ("01", "Order not found"),
            Ack::AmountMismatch => ("04", "Invalid amount"),
        };
        json!({ "RspCode": code, "Message": message })
    }
}

// =============================================================================
// MoMo
// =============================================================================

const MOMO_SIGNATURE: &str = "signature";

pub struct MomoGateway {
    config: MomoConfig,
}

impl MomoGateway {
    pub fn new(config: MomoConfig) -> Self {
        Self { config }
    }

    pub fn sign_params(&self, params: &mut Params) {
        let sig = signer::sign(&self.with_access_key(params), &self.config.secret_key, HashAlgo::Sha256);
        params.insert(MOMO_SIGNATURE.into(), sig);
    }

    /// MoMo signs over the access key, which never travels in the callback
    fn with_access_key(&self, params: &Params) -> Params {
        let mut p: Params = params
            .iter()
            .filter(|(k, _)| k.as_str() != MOMO_SIGNATURE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        p.insert("accessKey".into(), self.config.access_key.clone());
        p
    }
}

impl GatewayAdapter for MomoGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Momo
    }

    fn payment_url(&self, payment: &Payment, order: &Order, _client_ip: Option<&str>, _now: i64) -> String {
        let mut params: Params = [
            ("partnerCode", self.config.partner_code.clone()),
            ("requestId", payment.idempotency_key.clone()),
            ("orderId", payment.gateway_txn_ref.clone()),
            ("amount", self.encode_amount(payment.amount)),
            ("orderInfo", format!("Payment for order {}", order.order_number)),
            ("redirectUrl", self.config.return_url.clone()),
            ("ipnUrl", self.config.ipn_url.clone()),
            ("requestType", "captureWallet".into()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        self.sign_params(&mut params);
        format!("{}?{}", self.config.pay_url, signer::canonicalize(&params))
    }

    fn txn_ref<'a>(&self, params: &'a Params) -> Option<&'a str> {
        params.get("orderId").map(String::as_str)
    }

    fn verify(&self, params: &Params) -> bool {
        let Some(sig) = params.get(MOMO_SIGNATURE) else {
            return false;
        };
        signer::verify(&self.with_access_key(params), &self.config.secret_key, HashAlgo::Sha256, sig)
    }

    fn parse(&self, params: &Params) -> PaymentResult<ParsedCallback> {
        let outcome = match required(params, "resultCode")? {
            "0" => CallbackOutcome::Success,
            "1006" => CallbackOutcome::Cancelled,
            code => CallbackOutcome::Failed { code: code.to_string() },
        };
        Ok(ParsedCallback {
            txn_ref: required(params, "orderId")?.to_string(),
            amount: required(params, "amount")?.to_string(),
            outcome,
            transaction_no: params.get("transId").filter(|v| !v.is_empty()).cloned(),
        })
    }

    fn encode_amount(&self, amount: Decimal) -> String {
        minor_units(amount, 1)
    }

    fn ack(&self, ack: Ack) -> Value {
        let (code, message) = match ack {
            Ack::Confirmed | Ack::AlreadyConfirmed => (0, "Success"),
            Ack::InvalidSignature => (97, "Invalid signature"),
            Ack::UnknownPayment => (42, "Order not found"),
            Ack::AmountMismatch => (4, "Invalid amount"),
        };
        json!({ "partnerCode": self.config.partner_code, "resultCode": code, "message": message })
    }
}

/// The online gateways, by method
pub struct Gateways {
    vnpay: VnpayGateway,
    momo: MomoGateway,
}

impl Gateways {
    pub fn new(vnpay: VnpayConfig, momo: MomoConfig) -> Self {
        Self {
            vnpay: VnpayGateway::new(vnpay),
            momo: MomoGateway::new(momo),
        }
    }

    pub fn get(&self, method: PaymentMethod) -> Option<&dyn GatewayAdapter> {
        match method {
            PaymentMethod::Vnpay => Some(&self.vnpay),
            PaymentMethod::Momo => Some(&self.momo),
            PaymentMethod::Cod => None,
        }
    }

    pub fn vnpay(&self) -> &VnpayGateway {
        &self.vnpay
    }

    pub fn momo(&self) -> &MomoGateway {
        &self.momo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support::dec;

    fn gateways() -> Gateways {
        let c = Config::for_tests();
        Gateways::new(c.vnpay, c.momo)
    }

    fn query(url: &str) -> Params {
        let (_, q) = url.split_once('?').unwrap();
        url::form_urlencoded::parse(q.as_bytes()).into_owned().collect()
    }

    fn payment(amount: &str) -> Payment {
        Payment {
            id: "p1".into(),
            order_id: "o1".into(),
            method: PaymentMethod::Vnpay,
            amount: dec(amount),
            status: shared::models::PaymentStatus::Pending,
            gateway_txn_ref: "TXN1".into(),
            idempotency_key: "idem-1".into(),
            redirect_url: None,
            gateway_transaction_no: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn order() -> Order {
        Order {
            id: "o1".into(),
            order_number: "BK20260115-000001".into(),
            user_id: "u1".into(),
            status: shared::models::OrderStatus::Pending,
            subtotal: dec("150000"),
            discount: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            total: dec("150000"),
            promotion_id: None,
            shipping_address: crate::test_support::address(None),
            items: vec![],
            version: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn vnpay_url_is_signed_and_amount_scaled() {
        let g = gateways();
        let url = g.vnpay().payment_url(&payment("150000"), &order(), Some("10.0.0.1"), 0);
        let params = query(&url);
        assert_eq!(params["vnp_Amount"], "15000000");
        assert_eq!(params["vnp_TxnRef"], "TXN1");
        assert_eq!(params["vnp_IpAddr"], "10.0.0.1");
        assert_eq!(params["vnp_CreateDate"], "19700101070000");
        assert!(g.vnpay().verify(&params));
    }

    #[test]
    fn vnpay_result_codes() {
        let g = gateways();
        let mut p: Params = [
            ("vnp_TxnRef", "TXN1"),
            ("vnp_Amount", "15000000"),
            ("vnp_ResponseCode", "00"),
            ("vnp_TransactionStatus", "00"),
            ("vnp_TransactionNo", "998877"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let parsed = g.vnpay().parse(&p).unwrap();
        assert_eq!(parsed.outcome, CallbackOutcome::Success);
        assert_eq!(parsed.transaction_no.as_deref(), Some("998877"));

        p.insert("vnp_ResponseCode".into(), "24".into());
        assert_eq!(g.vnpay().parse(&p).unwrap().outcome, CallbackOutcome::Cancelled);

        p.insert("vnp_ResponseCode".into(), "51".into());
        p.insert("vnp_TransactionStatus".into(), "02".into());
        assert_eq!(
            g.vnpay().parse(&p).unwrap().outcome,
            CallbackOutcome::Failed { code: "51".into() }
        );
    }

    #[test]
    fn vnpay_rejects_tampered_callbacks() {
        let g = gateways();
        let mut p: Params = [("vnp_TxnRef", "TXN1"), ("vnp_Amount", "100")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        g.vnpay().sign_params(&mut p);
        assert!(g.vnpay().verify(&p));
        p.insert("vnp_Amount".into(), "1".into());
        assert!(!g.vnpay().verify(&p));
        p.remove(VNP_HASH);
        assert!(!g.vnpay().verify(&p));
    }

    #[test]
    fn momo_signs_over_the_access_key() {
        let g = gateways();
        let url = g.momo().payment_url(&payment("150000"), &order(), None, 0);
        let params = query(&url);
        assert_eq!(params["amount"], "150000");
        assert!(!params.contains_key("accessKey"));
        assert!(g.momo().verify(&params));

        let mut callback: Params = [("orderId", "TXN1"), ("amount", "150000"), ("resultCode", "1006")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        g.momo().sign_params(&mut callback);
        assert!(g.momo().verify(&callback));
        assert_eq!(g.momo().parse(&callback).unwrap().outcome, CallbackOutcome::Cancelled);
    }

    #[test]
    fn amounts_round_to_minor_units() {
        let g = gateways();
        assert_eq!(g.vnpay().encode_amount(dec("10.005")), "1001");
        assert_eq!(g.momo().encode_amount(dec("150000.00")), "150000");
    }

    #[test]
    fn cash_on_delivery_has_no_gateway() {
        assert!(gateways().get(PaymentMethod::Cod).is_none());
    }
}
