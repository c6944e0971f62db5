//! Request counters
use opentelemetry::{global, metrics::Counter, KeyValue};

/// A set of meter counters for the vendor services
#[derive(Debug, Clone)]
pub struct Meters {
    auth_requests: Counter<u64>,
    account_requests: Counter<u64>,
    vehicle_requests: Counter<u64>,
}

impl Meters {
    /// Create a new set of meter counters
    #[must_use]
    pub fn new() -> Self {
        let meter = global::meter("smarteq::api");

        Self {
            auth_requests: meter.u64_counter("auth_requests").build(),
            account_requests: meter.u64_counter("account_requests").build(),
            vehicle_requests: meter.u64_counter("vehicle_requests").build(),
        }
    }
}

impl Default for Meters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AuthOperation {
    Authorize,
    LoginUser,
    RequestOtp,
    SubmitOtp,
    Resume,
    ExchangeCode,
    RefreshToken,
}

impl AuthOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::LoginUser => "login_user",
            Self::RequestOtp => "request_otp",
            Self::SubmitOtp => "submit_otp",
            Self::Resume => "resume",
            Self::ExchangeCode => "exchange_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AccountOperation {
    GetUserInfo,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum VehicleOperation {
    GetInitData,
    GetRefreshData,
    GetCapabilities,
    StartPreheating,
}

impl VehicleOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::GetInitData => "get_init_data",
            Self::GetRefreshData => "get_refresh_data",
            Self::GetCapabilities => "get_capabilities",
            Self::StartPreheating => "start_preheating",
        }
    }
}

fn auth_attributes(url: &str, operation: AuthOperation, status: &'static str) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new("operation", operation.as_str()),
        KeyValue::new("status", status),
    ];
    // The resume path carries a per login identifier.
    if !matches!(operation, AuthOperation::Resume) {
        attributes.push(KeyValue::new("url", url.to_string()));
    }
    attributes
}

const fn status<U, E>(result: &Result<U, E>) -> &'static str {
    match result {
        Ok(_) => "successful",
        Err(_) => "error",
    }
}

impl Meters {
    pub(crate) fn auth<U, E>(
        &self,
        url: &str,
        operation: AuthOperation,
        result: Result<U, E>,
    ) -> Result<U, E> {
        self.auth_requests
            .add(1, &auth_attributes(url, operation, status(&result)));
        result
    }

    pub(crate) fn account<U, E>(
        &self,
        url: &str,
        operation: AccountOperation,
        result: Result<U, E>,
    ) -> Result<U, E> {
        let operation = match operation {
            AccountOperation::GetUserInfo => "get_user_info",
        };
        let attributes = [
            KeyValue::new("url", url.to_string()),
            KeyValue::new("operation", operation),
            KeyValue::new("status", status(&result)),
        ];
        self.account_requests.add(1, &attributes);
        result
    }

    pub(crate) fn vehicle<U, E>(
        &self,
        url: &str,
        operation: VehicleOperation,
        vin: &str,
        result: Result<U, E>,
    ) -> Result<U, E> {
        let attributes = [
            KeyValue::new("url", url.to_string()),
            KeyValue::new("operation", operation.as_str()),
            KeyValue::new("vin", vin.to_string()),
            KeyValue::new("status", status(&result)),
        ];
        self.vehicle_requests.add(1, &attributes);
        result
    }
}
