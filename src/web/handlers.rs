//! HTTP handlers for the gadget API

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

use crate::config::VendorConfig;
use crate::error::{AppError, Result};
use crate::gadget::{FunctionSet, GadgetCallback, GadgetStatus, UsbSpeed};
use crate::state::AppState;

/// Timeout used when the request does not carry one
const DEFAULT_TIMEOUT_MS: u64 = 2500;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at(),
    })
}

/// Value delivered through a [`ResponseCallback`]
#[derive(Debug)]
enum Delivery {
    Functions {
        functions: FunctionSet,
        status: GadgetStatus,
        transaction_id: i64,
    },
    Speed {
        speed: UsbSpeed,
        transaction_id: i64,
    },
}

/// Single-use callback that hands its result back to the HTTP handler
struct ResponseCallback {
    tx: Mutex<Option<oneshot::Sender<Delivery>>>,
}

impl ResponseCallback {
    fn new() -> (Arc<Self>, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn deliver(&self, delivery: Delivery) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .take()
            .ok_or_else(|| AppError::Callback("callback already invoked".to_string()))?;
        tx.send(delivery)
            .map_err(|_| AppError::Callback("request dropped".to_string()))
    }
}

#[async_trait]
impl GadgetCallback for ResponseCallback {
    async fn set_current_usb_functions_cb(
        &self,
        functions: FunctionSet,
        status: GadgetStatus,
        transaction_id: i64,
    ) -> Result<()> {
        self.deliver(Delivery::Functions {
            functions,
            status,
            transaction_id,
        })
    }

    async fn get_current_usb_functions_cb(
        &self,
        functions: FunctionSet,
        status: GadgetStatus,
        transaction_id: i64,
    ) -> Result<()> {
        self.deliver(Delivery::Functions {
            functions,
            status,
            transaction_id,
        })
    }

    async fn get_usb_speed_cb(&self, speed: UsbSpeed, transaction_id: i64) -> Result<()> {
        self.deliver(Delivery::Speed {
            speed,
            transaction_id,
        })
    }
}

async fn receive(rx: oneshot::Receiver<Delivery>) -> Result<Delivery> {
    rx.await
        .map_err(|_| AppError::Internal("gadget callback was not invoked".to_string()))
}

/// Current functions response
#[derive(Debug, Serialize)]
pub struct FunctionsResponse {
    pub functions: FunctionSet,
    pub status: GadgetStatus,
    pub status_code: i32,
    pub transaction_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub transaction_id: Option<i64>,
}

fn functions_response(delivery: Delivery) -> Result<FunctionsResponse> {
    match delivery {
        Delivery::Functions {
            functions,
            status,
            transaction_id,
        } => Ok(FunctionsResponse {
            functions,
            status,
            status_code: status.code(),
            transaction_id,
        }),
        other => Err(AppError::Internal(format!(
            "unexpected callback delivery: {:?}",
            other
        ))),
    }
}

pub async fn get_functions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<FunctionsResponse>> {
    let (callback, rx) = ResponseCallback::new();
    state
        .gadget
        .get_current_usb_functions(callback, query.transaction_id.unwrap_or_default())
        .await?;
    Ok(Json(functions_response(receive(rx).await?)?))
}

/// Function change request
#[derive(Debug, Deserialize)]
pub struct SetFunctionsRequest {
    pub functions: FunctionSet,
    pub timeout_ms: Option<u64>,
    pub transaction_id: Option<i64>,
}

pub async fn set_functions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetFunctionsRequest>,
) -> Result<Json<FunctionsResponse>> {
    let (callback, rx) = ResponseCallback::new();
    state
        .gadget
        .set_current_usb_functions(
            req.functions,
            Some(callback),
            req.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            req.transaction_id.unwrap_or_default(),
        )
        .await?;
    Ok(Json(functions_response(receive(rx).await?)?))
}

/// Link speed response
#[derive(Debug, Serialize)]
pub struct SpeedResponse {
    pub speed: UsbSpeed,
    pub speed_code: i32,
    pub transaction_id: i64,
}

pub async fn get_speed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<SpeedResponse>> {
    let (callback, rx) = ResponseCallback::new();
    state
        .gadget
        .get_usb_speed(callback, query.transaction_id.unwrap_or_default())
        .await?;

    match receive(rx).await? {
        Delivery::Speed {
            speed,
            transaction_id,
        } => Ok(Json(SpeedResponse {
            speed,
            speed_code: speed.code(),
            transaction_id,
        })),
        other => Err(AppError::Internal(format!(
            "unexpected callback delivery: {:?}",
            other
        ))),
    }
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub success: bool,
}

pub async fn reset_gadget(State(state): State<Arc<AppState>>) -> Result<Json<ResetResponse>> {
    state.gadget.reset().await?;
    Ok(Json(ResetResponse { success: true }))
}

/// Partial vendor property update
#[derive(Debug, Default, Deserialize)]
pub struct VendorConfigUpdate {
    pub build_type: Option<String>,
    pub boot_mode: Option<String>,
    pub usb_config: Option<String>,
    pub persist_usb_config: Option<String>,
    pub rndis_function: Option<String>,
    pub uvc_enabled: Option<bool>,
}

impl VendorConfigUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref build_type) = self.build_type {
            if !["user", "userdebug", "eng"].contains(&build_type.as_str()) {
                return Err(AppError::BadRequest(
                    "Invalid build_type: must be user, userdebug or eng".into(),
                ));
            }
        }
        if let Some(ref rndis) = self.rndis_function {
            if rndis.is_empty() || rndis.contains('/') {
                return Err(AppError::BadRequest(
                    "Invalid rndis_function: must be a function directory name".into(),
                ));
            }
        }
        for list in [&self.usb_config, &self.persist_usb_config].into_iter().flatten() {
            let unknown: Vec<&str> = list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty() && *name != "user")
                .filter(|name| crate::gadget::VendorFunction::lookup(name).is_none())
                .collect();
            if !unknown.is_empty() {
                warn!("Vendor function list contains unknown names: {:?}", unknown);
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut VendorConfig) {
        if let Some(ref build_type) = self.build_type {
            config.build_type = build_type.clone();
        }
        if let Some(ref boot_mode) = self.boot_mode {
            config.boot_mode = boot_mode.clone();
        }
        if let Some(ref usb_config) = self.usb_config {
            config.usb_config = usb_config.clone();
        }
        if let Some(ref persist) = self.persist_usb_config {
            config.persist_usb_config = persist.clone();
        }
        if let Some(ref rndis) = self.rndis_function {
            config.rndis_function = rndis.clone();
        }
        if let Some(uvc_enabled) = self.uvc_enabled {
            config.uvc_enabled = uvc_enabled;
        }
    }
}

pub async fn get_vendor_config(State(state): State<Arc<AppState>>) -> Json<VendorConfig> {
    Json(state.config.get().vendor.clone())
}

pub async fn update_vendor_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VendorConfigUpdate>,
) -> Result<Json<VendorConfig>> {
    req.validate()?;

    let config = state
        .config
        .update(|config| req.apply_to(&mut config.vendor))
        .await?;

    Ok(Json(config.vendor.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_response_callback_delivers_once() {
        let (callback, rx) = ResponseCallback::new();
        callback
            .get_usb_speed_cb(UsbSpeed::Full, 5)
            .await
            .unwrap();
        assert!(callback.get_usb_speed_cb(UsbSpeed::Full, 6).await.is_err());

        match receive(rx).await.unwrap() {
            Delivery::Speed {
                speed,
                transaction_id,
            } => {
                assert_eq!(speed, UsbSpeed::Full);
                assert_eq!(transaction_id, 5);
            }
            other => panic!("unexpected delivery {:?}", other),
        }
    }

    #[test]
    fn test_vendor_update() {
        let mut vendor = VendorConfig::default();
        let update = VendorConfigUpdate {
            usb_config: Some("diag,serial_cdev".to_string()),
            uvc_enabled: Some(true),
            ..Default::default()
        };
        update.validate().unwrap();
        update.apply_to(&mut vendor);
        assert_eq!(vendor.usb_config, "diag,serial_cdev");
        assert!(vendor.uvc_enabled);
        assert_eq!(vendor.rndis_function, "gsi.rndis");

        let bad = VendorConfigUpdate {
            build_type: Some("debug".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(AppError::BadRequest(_))));

        let bad = VendorConfigUpdate {
            rndis_function: Some("../gsi".to_string()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_set_request_forms() {
        let req: SetFunctionsRequest =
            serde_json::from_str(r#"{"functions":["adb","mtp"],"transaction_id":3}"#).unwrap();
        assert_eq!(req.functions, FunctionSet::ADB | FunctionSet::MTP);
        assert_eq!(req.timeout_ms, None);

        let req: SetFunctionsRequest =
            serde_json::from_str(r#"{"functions":33,"timeout_ms":500}"#).unwrap();
        assert_eq!(req.functions, FunctionSet::ADB | FunctionSet::RNDIS);
    }
}
