//! In-process RESP server for tests.
//!
//! Implements just the commands the Redis-backed store and lock service
//! send: `PING`, `AUTH`, `SELECT`, `CLIENT`, `HGET`, `HSET`, `HSETNX`,
//! `HDEL`, `HGETALL`, `SET ... NX PX`, `GET`, `DEL`, and `EVAL`/`EVALSHA`/
//! `SCRIPT LOAD` for the two scripts this crate runs. There is no Lua here:
//! a script is recognized by its source and emulated.

use crate::client::ClientOptions;
use crate::lock::redis::RELEASE_SCRIPT;
use crate::protocol::{RespParser, RespValue};
use crate::storage::redis::FENCED_DELETE_SCRIPT;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(Default)]
struct State {
    password: Option<String>,
    selected_database: Option<u32>,
    hashes: HashMap<String, HashMap<String, Bytes>>,
    strings: HashMap<String, (Bytes, Option<Instant>)>,
    scripts: HashMap<String, String>,
    commands: HashMap<String, usize>,
    stall: Option<Duration>,
}

impl State {
    fn live_string(&mut self, key: &str) -> Option<Bytes> {
        match self.strings.get(key) {
            Some((_, Some(deadline))) if Instant::now() >= *deadline => {
                self.strings.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn hdel(&mut self, hash: &str, field: &str) -> bool {
        self.hashes
            .get_mut(hash)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false)
    }

    fn run_script(&mut self, source: &str, keys: &[String], args: &[String]) -> RespValue {
        match (source, keys, args) {
            (RELEASE_SCRIPT, [key], [holder]) => {
                if self.live_string(key).as_deref() == Some(holder.as_bytes()) {
                    self.strings.remove(key);
                    RespValue::integer(1)
                } else {
                    RespValue::integer(0)
                }
            }
            (FENCED_DELETE_SCRIPT, [index, records], [field, expected]) => {
                let current = self.hashes.get(index).and_then(|h| h.get(field));
                if current.map(|v| &v[..]) == Some(expected.as_bytes()) {
                    self.hdel(records, field);
                    RespValue::integer(self.hdel(index, field) as i64)
                } else {
                    RespValue::integer(0)
                }
            }
            _ => RespValue::error("ERR script not supported by the test server"),
        }
    }
}

pub(crate) struct MiniRedis {
    port: u16,
    state: Arc<Mutex<State>>,
    generation: watch::Sender<u64>,
}

impl MiniRedis {
    pub(crate) async fn start() -> Self {
        Self::start_with(State::default()).await
    }

    pub(crate) async fn start_with_password(password: &str) -> Self {
        Self::start_with(State {
            password: Some(password.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn start_with(state: State) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(state));
        let (generation, _) = watch::channel(0u64);

        let accept_state = Arc::clone(&state);
        let accept_generation = generation.subscribe();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let mut stop = accept_generation.clone();
                stop.mark_unchanged();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = serve(stream, state) => {}
                        _ = stop.changed() => {}
                    }
                });
            }
        });

        Self {
            port,
            state,
            generation,
        }
    }

    /// Client options pointing here, with short timeouts and backoff.
    pub(crate) fn options(&self) -> ClientOptions {
        ClientOptions {
            host: "127.0.0.1".to_string(),
            port: self.port,
            max_retries: 1,
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(500),
            response_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    pub(crate) fn selected_database(&self) -> Option<u32> {
        self.state.lock().unwrap().selected_database
    }

    pub(crate) fn hget(&self, collection: &str, field: &str) -> Option<Bytes> {
        let state = self.state.lock().unwrap();
        state.hashes.get(collection).and_then(|h| h.get(field)).cloned()
    }

    /// How many times `name` has been received.
    pub(crate) fn command_count(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.commands.get(name).copied().unwrap_or(0)
    }

    /// Holds back every reply by `stall` (commands still run on arrival).
    pub(crate) fn set_stall(&self, stall: Option<Duration>) {
        self.state.lock().unwrap().stall = stall;
    }

    /// Closes every open client connection.
    pub(crate) fn drop_connections(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>) {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut parser = RespParser::new();
    let mut authenticated = state.lock().unwrap().password.is_none();

    loop {
        while let Ok(Some((command, consumed))) = parser.parse(&buffer) {
            let _ = buffer.split_to(consumed);
            let reply = execute(&state, &mut authenticated, command);

            let stall = state.lock().unwrap().stall;
            if let Some(stall) = stall {
                tokio::time::sleep(stall).await;
            }
            if stream.write_all(&reply.serialize()).await.is_err() {
                return;
            }
        }

        match stream.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Splits `numkeys key... arg...` into keys and args.
fn split_keys(rest: &[String]) -> Option<(&[String], &[String])> {
    let (numkeys, rest) = rest.split_first()?;
    let numkeys: usize = numkeys.parse().ok()?;
    (numkeys <= rest.len()).then(|| rest.split_at(numkeys))
}

fn execute(state: &Mutex<State>, authenticated: &mut bool, command: RespValue) -> RespValue {
    let args: Vec<String> = command
        .into_array()
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let Some(name) = args.first().map(|s| s.to_uppercase()) else {
        return RespValue::error("ERR empty command");
    };

    let mut state = state.lock().unwrap();
    *state.commands.entry(name.clone()).or_default() += 1;

    if name == "AUTH" {
        return if state.password.as_deref() == args.last().map(String::as_str) {
            *authenticated = true;
            RespValue::ok()
        } else {
            RespValue::error("WRONGPASS invalid username-password pair")
        };
    }
    if !*authenticated {
        return RespValue::error("NOAUTH Authentication required.");
    }

    match (name.as_str(), &args[1..]) {
        ("PING", _) => RespValue::pong(),
        ("CLIENT", _) => RespValue::ok(),
        ("SELECT", [db]) => match db.parse() {
            Ok(db) => {
                state.selected_database = Some(db);
                RespValue::ok()
            }
            Err(_) => RespValue::error("ERR invalid DB index"),
        },
        ("HGET", [hash, field]) => state
            .hashes
            .get(hash)
            .and_then(|h| h.get(field))
            .cloned()
            .map(RespValue::BulkString)
            .unwrap_or(RespValue::Null),
        ("HSET", [hash, field, value]) => {
            let created = state
                .hashes
                .entry(hash.clone())
                .or_default()
                .insert(field.clone(), Bytes::from(value.clone()))
                .is_none();
            RespValue::integer(created as i64)
        }
        ("HSETNX", [hash, field, value]) => {
            let fields = state.hashes.entry(hash.clone()).or_default();
            if fields.contains_key(field) {
                RespValue::integer(0)
            } else {
                fields.insert(field.clone(), Bytes::from(value.clone()));
                RespValue::integer(1)
            }
        }
        ("HDEL", [hash, field]) => RespValue::integer(state.hdel(hash, field) as i64),
        ("HGETALL", [hash]) => {
            let mut flat = Vec::new();
            if let Some(h) = state.hashes.get(hash) {
                for (field, value) in h {
                    flat.push(RespValue::bulk_string(Bytes::from(field.clone())));
                    flat.push(RespValue::BulkString(value.clone()));
                }
            }
            RespValue::array(flat)
        }
        ("SET", [key, value, nx, px, ms])
            if nx.eq_ignore_ascii_case("NX") && px.eq_ignore_ascii_case("PX") =>
        {
            let Ok(ms) = ms.parse::<u64>() else {
                return RespValue::error("ERR value is not an integer or out of range");
            };
            if state.live_string(key).is_some() {
                return RespValue::Null;
            }
            let deadline = Instant::now() + Duration::from_millis(ms);
            state
                .strings
                .insert(key.clone(), (Bytes::from(value.clone()), Some(deadline)));
            RespValue::ok()
        }
        ("GET", [key]) => state
            .live_string(key)
            .map(RespValue::BulkString)
            .unwrap_or(RespValue::Null),
        ("DEL", [key]) => RespValue::integer(state.strings.remove(key).is_some() as i64),
        ("SCRIPT", [sub, source]) if sub.eq_ignore_ascii_case("LOAD") => {
            let sha = redis::Script::new(source).get_hash().to_string();
            state.scripts.insert(sha.clone(), source.clone());
            RespValue::bulk_string(Bytes::from(sha))
        }
        ("EVAL", [source, rest @ ..]) => match split_keys(rest) {
            Some((keys, args)) => state.run_script(source, keys, args),
            None => RespValue::error("ERR wrong number of arguments for 'eval'"),
        },
        ("EVALSHA", [sha, rest @ ..]) => {
            let Some(source) = state.scripts.get(sha).cloned() else {
                return RespValue::error("NOSCRIPT No matching script. Please use EVAL.");
            };
            match split_keys(rest) {
                Some((keys, args)) => state.run_script(&source, keys, args),
                None => RespValue::error("ERR wrong number of arguments for 'evalsha'"),
            }
        }
        _ => RespValue::error(format!("ERR unknown command '{}'", name)),
    }
}
