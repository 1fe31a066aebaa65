use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use serde_json::{json, Map, Value as JsonValue};
use wiremock::{
    matchers::{method, path, path_regex},
    Match, Mock, MockServer, Request, ResponseTemplate,
};

const SERVER_NAME: &str = "localhost";

#[derive(Clone, Debug)]
struct Device {
    user_id: String,
    device_id: String,
}

#[derive(Debug, Default)]
struct Room {
    joined: BTreeSet<String>,
    invited: BTreeSet<String>,
    events: Vec<(u64, JsonValue)>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    stream_position: u64,
    passwords: BTreeMap<String, String>,
    sessions: BTreeMap<String, Device>,
    device_keys: BTreeMap<String, BTreeMap<String, JsonValue>>,
    one_time_keys: BTreeMap<(String, String), BTreeMap<String, JsonValue>>,
    key_changes: Vec<(u64, String)>,
    rooms: BTreeMap<String, Room>,
}

fn error(status: u16, errcode: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({ "errcode": errcode, "error": message }))
}

fn ok(body: JsonValue) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn parse_since(token: &str) -> Option<u64> {
    token.strip_prefix('s')?.parse().ok()
}

fn query_param(request: &Request, name: &str) -> Option<String> {
    request.url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn advance_stream(&mut self) -> u64 {
        self.stream_position += 1;
        self.stream_position
    }

    fn authenticate(&self, request: &Request) -> Result<Device, ResponseTemplate> {
        let Some(header) = request.headers.get("authorization") else {
            return Err(error(401, "M_MISSING_TOKEN", "Missing access token"));
        };

        let token = header.to_str().ok().and_then(|h| h.strip_prefix("Bearer ")).unwrap_or("");

        self.sessions
            .get(token)
            .cloned()
            .ok_or_else(|| error(401, "M_UNKNOWN_TOKEN", "Unrecognised access token"))
    }

    fn one_time_key_counts(&self, device: &Device) -> JsonValue {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();

        if let Some(keys) = self
            .one_time_keys
            .get(&(device.user_id.clone(), device.device_id.clone()))
        {
            for key_id in keys.keys() {
                let algorithm = key_id.split(':').next().unwrap_or_default();
                *counts.entry(algorithm.to_owned()).or_default() += 1;
            }
        }

        json!(counts)
    }

    fn push_event(&mut self, room_id: &str, mut event: JsonValue) -> String {
        let event_id = format!("$event{}:{SERVER_NAME}", self.next_id());
        let position = self.advance_stream();

        if let Some(object) = event.as_object_mut() {
            object.insert("event_id".to_owned(), json!(event_id));
            object.insert("origin_server_ts".to_owned(), json!(position));
        }

        if let Some(room) = self.rooms.get_mut(room_id) {
            room.events.push((position, event));
        }

        event_id
    }

    fn login(&mut self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<JsonValue>(&request.body) else {
            return error(400, "M_NOT_JSON", "Content not JSON");
        };

        let user = body["identifier"]["user"].as_str().unwrap_or_default();
        let localpart = user
            .strip_prefix('@')
            .and_then(|u| u.split(':').next())
            .unwrap_or(user)
            .to_owned();
        let password = body["password"].as_str().unwrap_or_default();

        if self.passwords.get(&localpart).map(String::as_str) != Some(password) {
            return error(403, "M_FORBIDDEN", "Invalid password");
        }

        let id = self.next_id();
        let device_id = body["device_id"]
            .as_str()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("DEVICE{id}"));
        let user_id = format!("@{localpart}:{SERVER_NAME}");
        let access_token = format!("syt_{localpart}_{id}");

        self.sessions.insert(
            access_token.clone(),
            Device { user_id: user_id.clone(), device_id: device_id.clone() },
        );

        ok(json!({
            "access_token": access_token,
            "device_id": device_id,
            "home_server": SERVER_NAME,
            "user_id": user_id,
        }))
    }

    fn logout(&mut self, request: &Request) -> ResponseTemplate {
        if let Err(response) = self.authenticate(request) {
            return response;
        }

        let token = request
            .headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_owned();
        self.sessions.remove(&token);

        ok(json!({}))
    }

    fn upload_keys(&mut self, request: &Request) -> ResponseTemplate {
        let device = match self.authenticate(request) {
            Ok(device) => device,
            Err(response) => return response,
        };
        let Ok(body) = serde_json::from_slice::<JsonValue>(&request.body) else {
            return error(400, "M_NOT_JSON", "Content not JSON");
        };

        if let Some(device_keys) = body.get("device_keys") {
            self.device_keys
                .entry(device.user_id.clone())
                .or_default()
                .insert(device.device_id.clone(), device_keys.clone());

            let position = self.advance_stream();
            self.key_changes.push((position, device.user_id.clone()));
        }

        if let Some(JsonValue::Object(keys)) = body.get("one_time_keys") {
            let stored = self
                .one_time_keys
                .entry((device.user_id.clone(), device.device_id.clone()))
                .or_default();

            for (key_id, key) in keys {
                stored.insert(key_id.clone(), key.clone());
            }
        }

        ok(json!({ "one_time_key_counts": self.one_time_key_counts(&device) }))
    }

    fn query_keys(&mut self, request: &Request) -> ResponseTemplate {
        if let Err(response) = self.authenticate(request) {
            return response;
        }
        let Ok(body) = serde_json::from_slice::<JsonValue>(&request.body) else {
            return error(400, "M_NOT_JSON", "Content not JSON");
        };

        let mut device_keys = Map::new();

        if let Some(JsonValue::Object(users)) = body.get("device_keys") {
            for (user_id, wanted) in users {
                let wanted: BTreeSet<&str> = wanted
                    .as_array()
                    .map(|devices| devices.iter().filter_map(JsonValue::as_str).collect())
                    .unwrap_or_default();

                let devices: Map<String, JsonValue> = self
                    .device_keys
                    .get(user_id)
                    .into_iter()
                    .flatten()
                    .filter(|(device_id, _)| {
                        wanted.is_empty() || wanted.contains(device_id.as_str())
                    })
                    .map(|(device_id, keys)| (device_id.clone(), keys.clone()))
                    .collect();

                device_keys.insert(user_id.clone(), JsonValue::Object(devices));
            }
        }

        ok(json!({ "device_keys": device_keys, "failures": {} }))
    }

    fn key_changes(&mut self, request: &Request) -> ResponseTemplate {
        if let Err(response) = self.authenticate(request) {
            return response;
        }

        let from = query_param(request, "from").and_then(|t| parse_since(&t)).unwrap_or(0);
        let to = query_param(request, "to").and_then(|t| parse_since(&t)).unwrap_or(u64::MAX);

        let changed: BTreeSet<&String> = self
            .key_changes
            .iter()
            .filter(|(position, _)| *position > from && *position <= to)
            .map(|(_, user_id)| user_id)
            .collect();

        ok(json!({ "changed": changed, "left": [] }))
    }

    fn create_room(&mut self, request: &Request) -> ResponseTemplate {
        let device = match self.authenticate(request) {
            Ok(device) => device,
            Err(response) => return response,
        };
        let body = serde_json::from_slice::<JsonValue>(&request.body).unwrap_or_default();

        let room_id = format!("!room{}:{SERVER_NAME}", self.next_id());
        self.rooms.insert(room_id.clone(), Room::default());

        self.push_event(
            &room_id,
            json!({
                "type": "m.room.create",
                "state_key": "",
                "sender": device.user_id,
                "content": { "creator": device.user_id, "room_version": "10" },
            }),
        );
        self.join(&room_id, &device.user_id);

        if let Some(name) = body["name"].as_str() {
            self.push_event(
                &room_id,
                json!({
                    "type": "m.room.name",
                    "state_key": "",
                    "sender": device.user_id,
                    "content": { "name": name },
                }),
            );
        }

        for invitee in body["invite"].as_array().into_iter().flatten().filter_map(|i| i.as_str()) {
            self.push_event(
                &room_id,
                json!({
                    "type": "m.room.member",
                    "state_key": invitee,
                    "sender": device.user_id,
                    "content": { "membership": "invite" },
                }),
            );
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.invited.insert(invitee.to_owned());
            }
        }

        ok(json!({ "room_id": room_id }))
    }

    fn join(&mut self, room_id: &str, user_id: &str) {
        self.push_event(
            room_id,
            json!({
                "type": "m.room.member",
                "state_key": user_id,
                "sender": user_id,
                "content": { "membership": "join" },
            }),
        );

        if let Some(room) = self.rooms.get_mut(room_id) {
            room.invited.remove(user_id);
            room.joined.insert(user_id.to_owned());
        }
    }

    fn join_room(&mut self, request: &Request) -> ResponseTemplate {
        let device = match self.authenticate(request) {
            Ok(device) => device,
            Err(response) => return response,
        };

        let room_id = request
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_owned();

        if !self.rooms.contains_key(&room_id) {
            return error(404, "M_NOT_FOUND", "Unknown room");
        }

        self.join(&room_id, &device.user_id);

        ok(json!({ "room_id": room_id }))
    }

    fn send_state_event(&mut self, request: &Request) -> ResponseTemplate {
        let device = match self.authenticate(request) {
            Ok(device) => device,
            Err(response) => return response,
        };
        let Ok(content) = serde_json::from_slice::<JsonValue>(&request.body) else {
            return error(400, "M_NOT_JSON", "Content not JSON");
        };

        // rooms/{room_id}/state/{event_type}[/{state_key}], an empty state key
        // may leave out the last segment.
        let segments: Vec<&str> = request.url.path_segments().into_iter().flatten().collect();
        let (room_id, event_type, state_key) = match segments.as_slice() {
            [.., room_id, "state", event_type] => (room_id, event_type, &""),
            [.., room_id, "state", event_type, state_key] => (room_id, event_type, state_key),
            _ => return error(400, "M_UNRECOGNIZED", "Unrecognized request"),
        };

        let joined = self.rooms.get(*room_id).map(|room| room.joined.contains(&device.user_id));
        match joined {
            None => return error(404, "M_NOT_FOUND", "Unknown room"),
            Some(false) => return error(403, "M_FORBIDDEN", "You are not in this room"),
            Some(true) => {}
        }

        let room_id = (*room_id).to_owned();
        let event_id = self.push_event(
            &room_id,
            json!({
                "type": event_type,
                "state_key": state_key,
                "sender": device.user_id,
                "content": content,
            }),
        );

        ok(json!({ "event_id": event_id }))
    }

    fn sync(&mut self, request: &Request) -> ResponseTemplate {
        let device = match self.authenticate(request) {
            Ok(device) => device,
            Err(response) => return response,
        };

        let since = query_param(request, "since").and_then(|t| parse_since(&t)).unwrap_or(0);

        let mut join = Map::new();
        let mut invite = Map::new();

        for (room_id, room) in &self.rooms {
            let events: Vec<&JsonValue> = room
                .events
                .iter()
                .filter(|(position, _)| *position > since)
                .map(|(_, event)| event)
                .collect();

            if room.joined.contains(&device.user_id) {
                if !events.is_empty() {
                    join.insert(
                        room_id.clone(),
                        json!({ "timeline": { "events": events, "limited": false } }),
                    );
                }
            } else if room.invited.contains(&device.user_id) {
                let invite_state: Vec<&JsonValue> =
                    room.events.iter().map(|(_, event)| event).collect();
                invite
                    .insert(room_id.clone(), json!({ "invite_state": { "events": invite_state } }));
            }
        }

        let changed: BTreeSet<&String> = self
            .key_changes
            .iter()
            .filter(|(position, _)| *position > since)
            .map(|(_, user_id)| user_id)
            .collect();

        ok(json!({
            "next_batch": format!("s{}", self.stream_position),
            "rooms": { "join": join, "invite": invite, "leave": {} },
            "device_lists": { "changed": changed, "left": [] },
            "device_one_time_keys_count": self.one_time_key_counts(&device),
        }))
    }
}

async fn route<M, H>(
    server: &MockServer,
    state: &Arc<Mutex<State>>,
    http_method: &str,
    matcher: M,
    handler: H,
) where
    M: Match + 'static,
    H: Fn(&mut State, &Request) -> ResponseTemplate + Send + Sync + 'static,
{
    let state = state.clone();

    Mock::given(method(http_method))
        .and(matcher)
        .respond_with(move |request: &Request| handler(&mut state.lock().unwrap(), request))
        .mount(server)
        .await;
}

/// A tiny homeserver that keeps its state in memory.
///
/// It understands just enough of the client-server API to let a couple of
/// clients log in, exchange their device keys, create and join rooms and sync
/// the resulting state events.
///
/// Tests can still mount their own mocks on [`MockHomeserver::server()`], a
/// mock with a higher priority takes precedence over the built-in endpoints.
#[derive(Debug)]
pub struct MockHomeserver {
    server: MockServer,
    state: Arc<Mutex<State>>,
}

impl MockHomeserver {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(State::default()));

        route(&server, &state, "POST", path("/_matrix/client/v3/login"), State::login).await;
        route(&server, &state, "POST", path("/_matrix/client/v3/logout"), State::logout).await;
        route(&server, &state, "POST", path("/_matrix/client/v3/keys/upload"), State::upload_keys)
            .await;
        route(&server, &state, "POST", path("/_matrix/client/v3/keys/query"), State::query_keys)
            .await;
        route(&server, &state, "GET", path("/_matrix/client/v3/keys/changes"), State::key_changes)
            .await;
        route(&server, &state, "POST", path("/_matrix/client/v3/createRoom"), State::create_room)
            .await;
        route(
            &server,
            &state,
            "POST",
            path_regex(r"^/_matrix/client/v3/join/[^/]+$"),
            State::join_room,
        )
        .await;
        route(
            &server,
            &state,
            "PUT",
            path_regex(r"^/_matrix/client/v3/rooms/[^/]+/state/"),
            State::send_state_event,
        )
        .await;
        route(&server, &state, "GET", path("/_matrix/client/v3/sync"), State::sync).await;

        Self { server, state }
    }

    /// The URL clients should use as their homeserver.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Allow `localpart` to log in with `password`.
    pub fn register_user(&self, localpart: &str, password: &str) {
        self.state.lock().unwrap().passwords.insert(localpart.to_owned(), password.to_owned());
    }

    /// The number of one-time keys the server holds for a device.
    pub fn one_time_key_count(&self, user_id: &str, device_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .one_time_keys
            .get(&(user_id.to_owned(), device_id.to_owned()))
            .map_or(0, BTreeMap::len)
    }

    /// Pretend other users claimed `count` one-time keys of a device.
    pub fn claim_one_time_keys(&self, user_id: &str, device_id: &str, count: usize) {
        let mut state = self.state.lock().unwrap();

        if let Some(keys) = state.one_time_keys.get_mut(&(user_id.to_owned(), device_id.to_owned()))
        {
            for _ in 0..count {
                keys.pop_first();
            }
        }
    }

    /// The current position of the event stream, as a sync token.
    pub fn current_sync_token(&self) -> String {
        format!("s{}", self.state.lock().unwrap().stream_position)
    }
}
