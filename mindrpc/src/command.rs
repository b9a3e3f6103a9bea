use crate::{Error, Result, session::Session};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// The command kinds the engine can issue. Protocol names must match the
/// device verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    BodyAuthenticate,
    BodyConfigSearch,
    RecordingSearch,
    IdSearch,
    RecordingUpdate,
}

impl CommandKind {
    pub fn protocol_name(self) -> &'static str {
        match self {
            CommandKind::BodyAuthenticate => "bodyAuthenticate",
            CommandKind::BodyConfigSearch => "bodyConfigSearch",
            CommandKind::RecordingSearch => "recordingSearch",
            CommandKind::IdSearch => "idSearch",
            CommandKind::RecordingUpdate => "recordingUpdate",
        }
    }
}

/// A single request/response exchange with a device.
///
/// Build one with a constructor, run it with [`Command::execute`], then
/// read the result through the accessors. Reading a result before the
/// command has executed is a programming error and panics.
pub struct Command {
    kind: CommandKind,
    body: Value,
    response: Option<Value>,
}

/// Fields requested back from a search; restricting the template keeps the
/// device from serializing its entire record graph into the response.
fn response_template(type_name: &str, fields: &[&str]) -> Value {
    json!([{
        "type": "responseTemplate",
        "typeName": type_name,
        "fieldName": fields,
    }])
}

impl Command {
    fn new(kind: CommandKind, body: Value) -> Self {
        Self {
            kind,
            body,
            response: None,
        }
    }

    pub fn body_authenticate(mak: &str) -> Self {
        Self::new(
            CommandKind::BodyAuthenticate,
            json!({
                "type": "bodyAuthenticate",
                "credential": {
                    "type": "makCredential",
                    "key": mak,
                },
            }),
        )
    }

    /// Resolves the device's body identifier, required by every search.
    pub fn body_config_search() -> Self {
        Self::new(
            CommandKind::BodyConfigSearch,
            json!({
                "type": "bodyConfigSearch",
                "bodyId": "-",
            }),
        )
    }

    /// Lists finished recordings on the device.
    pub fn recording_search(body_id: &str, offset: u32, count: u32) -> Self {
        Self::new(
            CommandKind::RecordingSearch,
            json!({
                "type": "recordingSearch",
                "bodyId": body_id,
                "state": ["complete", "inProgress"],
                "offset": offset,
                "count": count,
                "responseTemplate": response_template(
                    "recording",
                    &["recordingId", "title", "subtitle", "duration", "size", "drm", "startTime"],
                ),
            }),
        )
    }

    /// Fetches one recording's metadata by its identifier.
    pub fn recording_search_by_id(body_id: &str, recording_id: &str) -> Self {
        Self::new(
            CommandKind::RecordingSearch,
            json!({
                "type": "recordingSearch",
                "bodyId": body_id,
                "recordingId": recording_id,
                "responseTemplate": response_template(
                    "recording",
                    &["recordingId", "title", "subtitle", "duration", "size", "drm", "startTime"],
                ),
            }),
        )
    }

    /// Looks up the downloadable object identifier for a recording.
    pub fn id_search(body_id: &str, object_id: &str) -> Self {
        Self::new(
            CommandKind::IdSearch,
            json!({
                "type": "idSearch",
                "bodyId": body_id,
                "objectId": object_id,
                "namespace": "mfs",
            }),
        )
    }

    /// Marks a recording deleted on the device.
    pub fn recording_update_deleted(body_id: &str, recording_id: &str) -> Self {
        Self::new(
            CommandKind::RecordingUpdate,
            json!({
                "type": "recordingUpdate",
                "bodyId": body_id,
                "recordingId": [recording_id],
                "state": "deleted",
            }),
        )
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn request_body(&self) -> &Value {
        &self.body
    }

    /// Sends the command over `session` and stores the response.
    pub fn execute(&mut self, session: &mut Session) -> Result<&mut Self> {
        self.response = Some(session.round_trip(self.kind.protocol_name(), &self.body)?);
        Ok(self)
    }

    fn response(&self) -> &Value {
        self.response
            .as_ref()
            .expect("command accessed before execution")
    }

    /// Whether the device accepted the credential. Only meaningful for
    /// [`CommandKind::BodyAuthenticate`].
    pub fn auth_accepted(&self) -> bool {
        self.response().get("status").and_then(Value::as_str) == Some("success")
    }

    /// Device-supplied failure message, if any.
    pub fn message(&self) -> Option<&str> {
        self.response().get("message").and_then(Value::as_str)
    }

    /// Deserializes the typed records under `field` in the response.
    pub fn records<T: DeserializeOwned>(&self, field: &'static str) -> Result<Vec<T>> {
        let records = self
            .response()
            .get(field)
            .ok_or(Error::MissingField(field))?;
        serde_json::from_value(records.clone()).map_err(Error::MalformedBody)
    }

    /// First entry of the response's object identifier list; the download
    /// authorization for an [`Command::id_search`].
    pub fn first_object_id(&self) -> Result<&str> {
        self.response()
            .get("objectId")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .ok_or(Error::MissingField("objectId"))
    }

    /// Body identifier from a [`Command::body_config_search`] response.
    pub fn body_id(&self) -> Result<&str> {
        self.response()
            .get("bodyConfig")
            .and_then(Value::as_array)
            .and_then(|configs| configs.first())
            .and_then(|config| config.get("bodyId"))
            .and_then(Value::as_str)
            .ok_or(Error::MissingField("bodyConfig"))
    }

    #[cfg(test)]
    pub(crate) fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }
}
