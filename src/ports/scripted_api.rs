// Test double replaying scripted responses per endpoint.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

use super::bot_api::{BotApi, ConfigMap, InputAck, OutputResponse, StatusResponse};
use crate::sync::transport::TransportError;

type Reply<T> = Result<T, TransportError>;

struct Script<T> {
    queue: VecDeque<Reply<T>>,
    fallback: Reply<T>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Reply<T>) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Reply<T> {
        self.queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

pub(crate) fn http_error(code: u16) -> TransportError {
    TransportError::Status {
        code,
        message: None,
    }
}

pub(crate) struct ScriptedApi {
    config: Mutex<Script<Value>>,
    save: Mutex<Script<()>>,
    status: Mutex<Script<StatusResponse>>,
    start: Mutex<Script<()>>,
    stop: Mutex<Script<()>>,
    output: Mutex<Script<OutputResponse>>,
    input: Mutex<Script<InputAck>>,
    calls: Mutex<Vec<&'static str>>,
    saved: Mutex<Vec<ConfigMap>>,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self {
            config: Mutex::new(Script::new(Ok(json!({})))),
            save: Mutex::new(Script::new(Ok(()))),
            status: Mutex::new(Script::new(Ok(StatusResponse { running: false }))),
            start: Mutex::new(Script::new(Ok(()))),
            stop: Mutex::new(Script::new(Ok(()))),
            output: Mutex::new(Script::new(Ok(OutputResponse::default()))),
            input: Mutex::new(Script::new(Ok(InputAck::accepted()))),
            calls: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_config(&self, reply: Reply<Value>) {
        self.config.lock().unwrap().queue.push_back(reply);
    }

    pub(crate) fn set_config_fallback(&self, reply: Reply<Value>) {
        self.config.lock().unwrap().fallback = reply;
    }

    pub(crate) fn set_save_fallback(&self, reply: Reply<()>) {
        self.save.lock().unwrap().fallback = reply;
    }

    pub(crate) fn push_status(&self, reply: Reply<StatusResponse>) {
        self.status.lock().unwrap().queue.push_back(reply);
    }

    pub(crate) fn set_status_fallback(&self, reply: Reply<StatusResponse>) {
        self.status.lock().unwrap().fallback = reply;
    }

    pub(crate) fn set_start_fallback(&self, reply: Reply<()>) {
        self.start.lock().unwrap().fallback = reply;
    }

    pub(crate) fn set_stop_fallback(&self, reply: Reply<()>) {
        self.stop.lock().unwrap().fallback = reply;
    }

    pub(crate) fn push_output(&self, reply: Reply<Vec<&str>>) {
        let reply = reply.map(|lines| OutputResponse {
            output: lines.into_iter().map(str::to_string).collect(),
        });
        self.output.lock().unwrap().queue.push_back(reply);
    }

    pub(crate) fn set_output_fallback(&self, reply: Reply<Vec<&str>>) {
        self.output.lock().unwrap().fallback = reply.map(|lines| OutputResponse {
            output: lines.into_iter().map(str::to_string).collect(),
        });
    }

    pub(crate) fn set_input_fallback(&self, reply: Reply<InputAck>) {
        self.input.lock().unwrap().fallback = reply;
    }

    pub(crate) fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| **name == endpoint)
            .count()
    }

    pub(crate) fn saved(&self) -> Vec<ConfigMap> {
        self.saved.lock().unwrap().clone()
    }

    pub(crate) fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    fn record(&self, endpoint: &'static str) {
        self.calls.lock().unwrap().push(endpoint);
    }
}

#[async_trait]
impl BotApi for ScriptedApi {
    async fn get_config(&self) -> Result<Value, TransportError> {
        self.record("config");
        self.config.lock().unwrap().next()
    }

    async fn save_config(&self, config: &ConfigMap) -> Result<(), TransportError> {
        self.record("save");
        self.saved.lock().unwrap().push(config.clone());
        self.save.lock().unwrap().next()
    }

    async fn get_status(&self) -> Result<StatusResponse, TransportError> {
        self.record("status");
        self.status.lock().unwrap().next()
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.record("start");
        self.start.lock().unwrap().next()
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.record("stop");
        self.stop.lock().unwrap().next()
    }

    async fn get_output(&self) -> Result<OutputResponse, TransportError> {
        self.record("output");
        self.output.lock().unwrap().next()
    }

    async fn send_input(&self, input: &str) -> Result<InputAck, TransportError> {
        self.record("input");
        self.inputs.lock().unwrap().push(input.to_string());
        self.input.lock().unwrap().next()
    }
}
