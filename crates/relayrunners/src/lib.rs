//! Embedded runner library
//!
//! Runners shipped with the runtime: ping, variable operations, HTTP and a
//! few SDK-style components.

mod http;
mod operations;
mod ping;
mod sdk;

pub use http::{HttpRequestConnector, ERROR_HTTP, HTTP_REQUEST_TYPE};
pub use operations::{
    SetVariablesWorker, ERROR_DATE_PARSE, ERROR_SYNTAX, ERROR_UNKNOWN_FUNCTION, SET_VARIABLES_TYPE,
};
pub use ping::{
    PingConnector, PingConnectorInput, PingConnectorOutput, PingWorker, ERROR_BAD_WEATHER, PING_CONNECTOR_TYPE,
    PING_WORKER_TYPE,
};
pub use sdk::{BasicPingHandlers, SdkEchoFunction, BASIC_PING_TYPE, BASIC_WEATHER_TYPE, SDK_ECHO_TYPE};

use relaycore::Runner;
use relayruntime::{ClassCatalog, Component, EmbeddedCatalog};
use std::sync::Arc;

const PING_WORKER_CLASS: &str = "relayrunners::PingWorker";
const PING_CONNECTOR_CLASS: &str = "relayrunners::PingConnector";
const SET_VARIABLES_CLASS: &str = "relayrunners::SetVariablesWorker";
const HTTP_REQUEST_CLASS: &str = "relayrunners::HttpRequestConnector";
const BASIC_PING_CLASS: &str = "relayrunners::BasicPingHandlers";
const SDK_ECHO_CLASS: &str = "relayrunners::SdkEchoFunction";

fn component(class_name: &str) -> Option<Component> {
    let component = match class_name {
        PING_WORKER_CLASS => Component::runner(Runner::worker(PingWorker::new())),
        PING_CONNECTOR_CLASS => Component::runner(Runner::connector(PingConnector::new())),
        SET_VARIABLES_CLASS => Component::runner(Runner::worker(SetVariablesWorker::new())),
        HTTP_REQUEST_CLASS => Component::runner(Runner::connector(HttpRequestConnector::new())),
        BASIC_PING_CLASS => Component::Handlers(BasicPingHandlers::methods()),
        SDK_ECHO_CLASS => Component::outbound(SdkEchoFunction::declaration(), Arc::new(SdkEchoFunction)),
        _ => return None,
    };
    Some(component)
}

const CLASSES: [&str; 6] = [
    PING_WORKER_CLASS,
    PING_CONNECTOR_CLASS,
    SET_VARIABLES_CLASS,
    HTTP_REQUEST_CLASS,
    BASIC_PING_CLASS,
    SDK_ECHO_CLASS,
];

/// Register all embedded runners with a catalog
pub fn register_all(catalog: &mut EmbeddedCatalog) {
    for class_name in CLASSES {
        if let Some(component) = component(class_name) {
            catalog.register(class_name, component);
        }
    }
}

pub fn embedded_catalog() -> EmbeddedCatalog {
    let mut catalog = EmbeddedCatalog::new();
    register_all(&mut catalog);
    catalog
}

/// Constructors archives can reference in their manifest
pub fn class_catalog() -> ClassCatalog {
    let mut classes = ClassCatalog::new();
    for class_name in CLASSES {
        classes.register(class_name, move || {
            component(class_name).ok_or_else(|| format!("No constructor for [{}]", class_name))
        });
    }
    classes
}
