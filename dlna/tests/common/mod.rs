#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dlna::model::{Action, Device, Service, ServiceKind, Udn};
use dlna::registry::Announcement;
use dlna::transport::soap::{SoapError, SoapRequest, SoapResponse, SoapTransport};
use dlna::{ControlConfig, ControlPoint};

pub const RENDERER: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// A recorded SOAP call
#[derive(Debug, Clone)]
pub struct Call {
    pub control_url: String,
    pub request: SoapRequest,
}

impl Call {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.request
            .params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
struct Reply {
    result: Result<SoapResponse, SoapError>,
    delay: Duration,
}

/// SOAP transport answering from a per-action script and recording every call.
/// Unscripted actions succeed with no output arguments.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set(&self, action: &str, result: Result<SoapResponse, SoapError>) {
        let mut replies = self.replies.lock().unwrap();
        let delay = replies.get(action).map(|r| r.delay).unwrap_or_default();
        replies.insert(action.to_string(), Reply { result, delay });
    }

    pub fn reply(&self, action: &str, args: &[(&str, &str)]) {
        let args = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.set(action, Ok(SoapResponse { body: String::new(), args }));
    }

    pub fn fault(&self, action: &str, code: u16, description: &str) {
        self.set(
            action,
            Err(SoapError::Fault {
                code,
                description: description.to_string(),
            }),
        );
    }

    pub fn fail(&self, action: &str) {
        self.set(action, Err(SoapError::Communication("connection refused".to_string())));
    }

    /// Delay the reply to `action`; the scripted result is kept
    pub fn delay(&self, action: &str, delay: Duration) {
        let mut replies = self.replies.lock().unwrap();
        let reply = replies.entry(action.to_string()).or_insert_with(|| Reply {
            result: Ok(SoapResponse::default()),
            delay,
        });
        reply.delay = delay;
    }

    pub fn transport_state(&self, state: &str) {
        self.reply("GetTransportInfo", &[("CurrentTransportState", state), ("CurrentTransportStatus", "OK")]);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, action: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.request.action == action)
            .collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls_to(action).len()
    }

    pub fn last(&self, action: &str) -> Option<Call> {
        self.calls_to(action).pop()
    }
}

#[async_trait]
impl SoapTransport for ScriptedTransport {
    async fn call(&self, control_url: &str, request: &SoapRequest) -> Result<SoapResponse, SoapError> {
        self.calls.lock().unwrap().push(Call {
            control_url: control_url.to_string(),
            request: request.clone(),
        });

        let reply = self.replies.lock().unwrap().get(&request.action).cloned();
        match reply {
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.result
            }
            None => Ok(SoapResponse::default()),
        }
    }
}

pub fn service(kind: ServiceKind, base: &str) -> Service {
    Service {
        service_type: kind.service_type_urn(),
        service_id: format!("urn:upnp-org:serviceId:{}", kind.id()),
        control_url: format!("{}/{}/control", base, kind.id()),
        event_sub_url: format!("{}/{}/event", base, kind.id()),
        scpd_url: format!("{}/{}/scpd.xml", base, kind.id()),
        actions: None,
    }
}

pub fn device(udn: &str, name: &str, device_type: &str) -> Device {
    let base = "http://192.168.1.50:49152";
    Device {
        udn: Udn::new(udn),
        friendly_name: name.to_string(),
        device_type: device_type.to_string(),
        manufacturer: "Acme".to_string(),
        model_name: "Renderer".to_string(),
        model_description: None,
        model_number: None,
        serial_number: None,
        location: format!("{}/description.xml", base),
        host: "192.168.1.50".to_string(),
        port: 49152,
        base_url: base.to_string(),
        presentation_url: None,
        icons: vec![],
        services: vec![
            service(ServiceKind::AVTransport, base),
            service(ServiceKind::RenderingControl, base),
            service(ServiceKind::ConnectionManager, base),
        ],
    }
}

pub fn renderer(udn: &str) -> Device {
    device(udn, "Living Room", RENDERER)
}

/// Declare the action list of one of the device's services
pub fn declare_actions(device: &mut Device, kind: ServiceKind, actions: &[&str]) {
    for service in device.services.iter_mut().filter(|s| kind.matches(s)) {
        service.actions = Some(
            actions
                .iter()
                .map(|name| Action {
                    name: name.to_string(),
                    arguments: vec![],
                })
                .collect(),
        );
    }
}

pub fn announce(device: Device) -> Announcement {
    Announcement::new(device, Duration::from_secs(1800))
}

/// Control point over a scripted transport with one renderer registered
pub fn control_point_with(device: Device) -> (ControlPoint, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new();
    let control_point = ControlPoint::with_transport(ControlConfig::fast(), transport.clone());
    control_point.admit(announce(device));
    (control_point, transport)
}
