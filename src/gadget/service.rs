//! Callback-style gadget service
//!
//! Mirrors the platform HAL surface: every operation reports its outcome to
//! a caller-supplied callback together with the caller's transaction id.
//! Each call invokes its callback at most once.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::controller::GadgetController;
use super::function::FunctionSet;
use super::types::{GadgetState, GadgetStatus, UsbSpeed};
use crate::error::{AppError, Result};

/// Receiver of asynchronous gadget results
#[async_trait]
pub trait GadgetCallback: Send + Sync {
    async fn set_current_usb_functions_cb(
        &self,
        functions: FunctionSet,
        status: GadgetStatus,
        transaction_id: i64,
    ) -> Result<()>;

    async fn get_current_usb_functions_cb(
        &self,
        functions: FunctionSet,
        status: GadgetStatus,
        transaction_id: i64,
    ) -> Result<()>;

    async fn get_usb_speed_cb(&self, speed: UsbSpeed, transaction_id: i64) -> Result<()>;
}

/// Service façade over the gadget controller
#[derive(Clone)]
pub struct UsbGadgetService {
    controller: Arc<GadgetController>,
}

impl UsbGadgetService {
    pub fn new(controller: Arc<GadgetController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<GadgetController> {
        &self.controller
    }

    /// Apply `functions` and report the outcome
    ///
    /// A NONE request without a callback still tears the gadget down but is
    /// reported as caller misuse.
    ///
    /// The request runs on its own task. Dropping the returned future does
    /// not abort it, and the callback is still delivered.
    pub async fn set_current_usb_functions(
        &self,
        functions: FunctionSet,
        callback: Option<Arc<dyn GadgetCallback>>,
        timeout_ms: u64,
        transaction_id: i64,
    ) -> Result<()> {
        let controller = self.controller.clone();
        let task = tokio::spawn(async move {
            set_and_report(&controller, functions, callback, timeout_ms, transaction_id).await
        });
        task.await
            .map_err(|e| AppError::Internal(format!("USB function request task failed: {}", e)))?
    }

    /// Report the current functions and whether they are applied
    pub async fn get_current_usb_functions(
        &self,
        callback: Arc<dyn GadgetCallback>,
        transaction_id: i64,
    ) -> Result<GadgetState> {
        let state = self.controller.current_functions();
        callback
            .get_current_usb_functions_cb(
                state.current_functions,
                GadgetStatus::from_applied(state.functions_applied),
                transaction_id,
            )
            .await
            .map_err(|e| {
                error!("Call to getCurrentUsbFunctionsCb failed: {}", e);
                AppError::Callback(e.to_string())
            })?;
        Ok(state)
    }

    /// Report the current link speed
    pub async fn get_usb_speed(
        &self,
        callback: Arc<dyn GadgetCallback>,
        transaction_id: i64,
    ) -> Result<UsbSpeed> {
        let speed = self.controller.usb_speed();
        callback
            .get_usb_speed_cb(speed, transaction_id)
            .await
            .map_err(|e| {
                error!("Call to getUsbSpeedCb failed: {}", e);
                AppError::Callback(e.to_string())
            })?;
        Ok(speed)
    }

    pub async fn reset(&self) -> Result<()> {
        self.controller.reset().await
    }
}

async fn set_and_report(
    controller: &GadgetController,
    functions: FunctionSet,
    callback: Option<Arc<dyn GadgetCallback>>,
    timeout_ms: u64,
    transaction_id: i64,
) -> Result<()> {
    let result = controller
        .set_current_functions(functions, Duration::from_millis(timeout_ms))
        .await;

    let Some(callback) = callback else {
        if functions.is_none() && result.is_ok() {
            return Err(AppError::CallerMisuse(
                "callback required when clearing USB functions".to_string(),
            ));
        }
        return result;
    };

    let status = match &result {
        Ok(()) => GadgetStatus::Success,
        Err(e) => e.status(),
    };
    if let Err(e) = callback
        .set_current_usb_functions_cb(functions, status, transaction_id)
        .await
    {
        error!("Call to setCurrentUsbFunctionsCb failed: {}", e);
    }

    info!("USB functions {} set, status {:?}", functions, status);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, GadgetConfig};
    use crate::events::EventBus;
    use crate::gadget::configfs::{read_file, scratch_gadget};
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    #[derive(Debug, Clone, PartialEq)]
    enum Record {
        Set(FunctionSet, GadgetStatus, i64),
        Get(FunctionSet, GadgetStatus, i64),
        Speed(UsbSpeed, i64),
    }

    #[derive(Default)]
    struct Recorder {
        records: Mutex<Vec<Record>>,
        fail: bool,
    }

    impl Recorder {
        fn push(&self, record: Record) -> Result<()> {
            self.records.lock().push(record);
            if self.fail {
                Err(AppError::Callback("binder died".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl GadgetCallback for Recorder {
        async fn set_current_usb_functions_cb(
            &self,
            functions: FunctionSet,
            status: GadgetStatus,
            transaction_id: i64,
        ) -> Result<()> {
            self.push(Record::Set(functions, status, transaction_id))
        }

        async fn get_current_usb_functions_cb(
            &self,
            functions: FunctionSet,
            status: GadgetStatus,
            transaction_id: i64,
        ) -> Result<()> {
            self.push(Record::Get(functions, status, transaction_id))
        }

        async fn get_usb_speed_cb(&self, speed: UsbSpeed, transaction_id: i64) -> Result<()> {
            self.push(Record::Speed(speed, transaction_id))
        }
    }

    async fn service() -> (TempDir, UsbGadgetService) {
        let dir = tempdir().unwrap();
        let configfs = scratch_gadget(dir.path());
        fs::create_dir_all(dir.path().join("usb-ffs/adb")).unwrap();
        fs::write(dir.path().join("current_speed"), "high-speed\n").unwrap();

        let gadget = GadgetConfig {
            udc_name: configfs.udc_name().to_string(),
            configfs_path: configfs.gadget_path().display().to_string(),
            ffs_path: dir.path().join("usb-ffs").display().to_string(),
            speed_path: Some(dir.path().join("current_speed").display().to_string()),
            disconnect_wait_ms: 0,
            pullup_delay_ms: 0,
        };
        let store = ConfigStore::new(&dir.path().join("config.db")).await.unwrap();
        let controller =
            GadgetController::new(&gadget, store, Arc::new(EventBus::new())).unwrap();
        (dir, UsbGadgetService::new(Arc::new(controller)))
    }

    #[tokio::test]
    async fn test_set_reports_success_once() {
        let (_dir, service) = service().await;
        let recorder = Arc::new(Recorder::default());

        service
            .set_current_usb_functions(FunctionSet::MIDI, Some(recorder.clone()), 1000, 7)
            .await
            .unwrap();

        assert_eq!(
            *recorder.records.lock(),
            vec![Record::Set(FunctionSet::MIDI, GadgetStatus::Success, 7)]
        );
    }

    #[tokio::test]
    async fn test_set_reports_not_supported() {
        let (_dir, service) = service().await;
        let recorder = Arc::new(Recorder::default());
        let functions = FunctionSet::ADB | FunctionSet::UVC;

        let result = service
            .set_current_usb_functions(functions, Some(recorder.clone()), 1000, 8)
            .await;

        assert!(matches!(result, Err(AppError::NotSupported(_))));
        assert_eq!(
            *recorder.records.lock(),
            vec![Record::Set(
                functions,
                GadgetStatus::ConfigurationNotSupported,
                8
            )]
        );
    }

    #[tokio::test]
    async fn test_set_timeout_reports_error() {
        let (_dir, service) = service().await;
        let recorder = Arc::new(Recorder::default());

        let result = service
            .set_current_usb_functions(FunctionSet::ADB, Some(recorder.clone()), 50, 9)
            .await;

        assert!(matches!(result, Err(AppError::Timeout(_))));
        assert_eq!(
            *recorder.records.lock(),
            vec![Record::Set(FunctionSet::ADB, GadgetStatus::Error, 9)]
        );
        service.controller().shutdown().await;
    }

    #[tokio::test]
    async fn test_none_without_callback_is_misuse() {
        let (dir, service) = service().await;
        service
            .set_current_usb_functions(FunctionSet::MIDI, None, 1000, 1)
            .await
            .unwrap();

        let result = service
            .set_current_usb_functions(FunctionSet::NONE, None, 1000, 2)
            .await;
        assert!(matches!(result, Err(AppError::CallerMisuse(_))));

        // Teardown still happened
        assert_eq!(read_file(&dir.path().join("g1/UDC")).unwrap(), "none");
    }

    #[tokio::test]
    async fn test_abandoned_request_still_reports() {
        let (_dir, service) = service().await;
        let recorder = Arc::new(Recorder::default());

        let call =
            service.set_current_usb_functions(FunctionSet::ADB, Some(recorder.clone()), 300, 21);
        assert!(tokio::time::timeout(Duration::from_millis(50), call)
            .await
            .is_err());
        assert!(recorder.records.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            *recorder.records.lock(),
            vec![Record::Set(FunctionSet::ADB, GadgetStatus::Error, 21)]
        );
        service.controller().shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_failure_keeps_state() {
        let (_dir, service) = service().await;
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });

        service
            .set_current_usb_functions(FunctionSet::MIDI, Some(recorder.clone()), 1000, 3)
            .await
            .unwrap();
        assert!(service.controller().current_functions().functions_applied);
        assert_eq!(recorder.records.lock().len(), 1);

        let result = service.get_usb_speed(recorder.clone(), 4).await;
        assert!(matches!(result, Err(AppError::Callback(_))));
    }

    #[tokio::test]
    async fn test_getters_echo_transaction_id() {
        let (_dir, service) = service().await;
        let recorder = Arc::new(Recorder::default());

        service
            .get_current_usb_functions(recorder.clone(), 11)
            .await
            .unwrap();
        service
            .set_current_usb_functions(FunctionSet::MIDI, None, 1000, 12)
            .await
            .unwrap();
        service
            .get_current_usb_functions(recorder.clone(), 13)
            .await
            .unwrap();
        let speed = service.get_usb_speed(recorder.clone(), 14).await.unwrap();
        assert_eq!(speed, UsbSpeed::High);

        assert_eq!(
            *recorder.records.lock(),
            vec![
                Record::Get(FunctionSet::NONE, GadgetStatus::FunctionsNotApplied, 11),
                Record::Get(FunctionSet::MIDI, GadgetStatus::FunctionsApplied, 13),
                Record::Speed(UsbSpeed::High, 14),
            ]
        );
    }
}
