// SPDX-License-Identifier: Apache-2.0

//! Hosting under the Windows service control manager.

use std::ffi::OsString;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use windows_service::service::{
    ServiceAccess, ServiceControl, ServiceControlAccept, ServiceErrorControl, ServiceExitCode,
    ServiceInfo, ServiceStartType, ServiceState, ServiceStatus, ServiceType,
};
use windows_service::service_control_handler::{self, ServiceControlHandlerResult};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};
use windows_service::{define_windows_service, service_dispatcher};

use super::{AgentMain, Interactive, ProcessLifecycle, SERVICE_NAME, build_runtime};
use crate::init::BoxError;

/// Returned by the dispatcher when the process was not started by the service manager
const ERROR_FAILED_SERVICE_CONTROLLER_CONNECT: i32 = 1063;

/// The dispatcher calls back through a plain function, so the agent is parked here.
static PENDING_AGENT: Mutex<Option<AgentMain>> = Mutex::new(None);
static AGENT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

define_windows_service!(ffi_service_main, service_main);

pub struct WindowsService {
    name: &'static str,
}

impl WindowsService {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl ProcessLifecycle for WindowsService {
    fn name(&self) -> &'static str {
        "windows-service"
    }

    fn run(self: Box<Self>, agent: AgentMain) -> Result<(), BoxError> {
        set_pending(agent);
        match service_dispatcher::start(self.name, ffi_service_main) {
            Ok(()) => match AGENT_RESULT.lock().ok().and_then(|mut r| r.take()) {
                Some(Err(e)) => Err(e.into()),
                _ => Ok(()),
            },
            Err(windows_service::Error::Winapi(e))
                if e.raw_os_error() == Some(ERROR_FAILED_SERVICE_CONTROLLER_CONNECT) =>
            {
                // Started from a console rather than by the service manager.
                let agent = take_pending().ok_or("agent already started")?;
                Box::new(Interactive).run(agent)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn set_pending(agent: AgentMain) {
    if let Ok(mut slot) = PENDING_AGENT.lock() {
        *slot = Some(agent);
    }
}

fn take_pending() -> Option<AgentMain> {
    PENDING_AGENT.lock().ok().and_then(|mut slot| slot.take())
}

fn service_main(_arguments: Vec<OsString>) {
    let result = run_service().map_err(|e| e.to_string());
    if let Err(ref e) = result {
        error!(error = %e, "Service stopped with error");
    }
    if let Ok(mut slot) = AGENT_RESULT.lock() {
        *slot = Some(result);
    }
}

fn run_service() -> Result<(), BoxError> {
    let agent = take_pending().ok_or("no agent to run")?;
    let stop = CancellationToken::new();

    let handler_stop = stop.clone();
    let event_handler = move |control| match control {
        ServiceControl::Stop | ServiceControl::Shutdown => {
            info!("Service stop requested");
            handler_stop.cancel();
            ServiceControlHandlerResult::NoError
        }
        ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
        _ => ServiceControlHandlerResult::NotImplemented,
    };
    let status_handle = service_control_handler::register(SERVICE_NAME, event_handler)?;

    status_handle.set_service_status(status(
        ServiceState::Running,
        ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN,
    ))?;

    let runtime = build_runtime()?;
    let result = runtime.block_on(agent(stop));

    status_handle.set_service_status(status(ServiceState::Stopped, ServiceControlAccept::empty()))?;
    result
}

fn status(state: ServiceState, accept: ServiceControlAccept) -> ServiceStatus {
    ServiceStatus {
        service_type: ServiceType::OWN_PROCESS,
        current_state: state,
        controls_accepted: accept,
        exit_code: ServiceExitCode::Win32(0),
        checkpoint: 0,
        wait_hint: Duration::default(),
        process_id: None,
    }
}

pub(super) fn install(name: &str, description: &str) -> Result<(), BoxError> {
    let manager = ServiceManager::local_computer(
        None::<&str>,
        ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
    )?;
    let info = ServiceInfo {
        name: OsString::from(name),
        display_name: OsString::from(name),
        service_type: ServiceType::OWN_PROCESS,
        start_type: ServiceStartType::AutoStart,
        error_control: ServiceErrorControl::Normal,
        executable_path: std::env::current_exe()?,
        launch_arguments: vec![OsString::from("run")],
        dependencies: vec![],
        account_name: None,
        account_password: None,
    };
    let service = manager.create_service(&info, ServiceAccess::CHANGE_CONFIG)?;
    service.set_description(description)?;
    info!(name, "Installed service");
    Ok(())
}

pub(super) fn uninstall(name: &str) -> Result<(), BoxError> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
    let service = manager.open_service(name, ServiceAccess::DELETE)?;
    service.delete()?;
    info!(name, "Removed service");
    Ok(())
}
