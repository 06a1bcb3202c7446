//! HTTP surface of a node: transactions (`POST`) take the write lock, queries (`GET`) the read
//! lock, so readers always see a state between two transitions.
use std::sync::{Arc, RwLock};

use rocket::{
    get,
    http::Status,
    post, routes,
    serde::json::Json,
    Build, Rocket, State,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::coordinator::{ContributionOutcome, Coordinator};
use crate::engine::SigningEngine;
use crate::error::{ErrorKind, Result, TssError};
use crate::gateway::{Gateway, PendingBatches, SignRequestMsg};
use crate::genesis::GenesisState;
use crate::selector::{KeyRegistry, ValidatorSnapshot};
use crate::session::{Signature, SigningSession};
use crate::store::KvStore;
use crate::types::{serde_hex, ParticipantId, SessionId};

pub type DynEngine = Box<dyn SigningEngine + Send + Sync>;
pub type DynStore = Box<dyn KvStore + Send + Sync>;

/// Replicated module state plus the snapshots it is evaluated against.
pub struct Node {
    coordinator: Coordinator<DynStore, DynEngine>,
    gateway: Gateway<PendingBatches>,
    keys: KeyRegistry,
    validators: ValidatorSnapshot,
    height: u64,
}

impl Node {
    /// Builds a node over `kv`. Sessions, signatures and the block height already in `kv` are
    /// picked up, so a restarted node continues where it stopped.
    pub fn from_genesis(genesis: GenesisState, kv: DynStore, engine: DynEngine) -> Result<Self> {
        genesis.validate()?;
        let keys = genesis.key_registry();
        let coordinator = Coordinator::new(kv, engine, genesis.params.timeout_blocks);
        let height = coordinator.height()?;
        if height > 0 {
            info!(height, "resuming from stored state");
        }
        Ok(Node {
            coordinator,
            gateway: Gateway::from_params(&genesis.params, genesis.pending_batches),
            keys,
            validators: genesis.validators,
            height,
        })
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn coordinator(&self) -> &Coordinator<DynStore, DynEngine> {
        &self.coordinator
    }

    pub fn submit(&mut self, msg: SignRequestMsg) -> Result<SessionId> {
        self.gateway.submit(
            &mut self.coordinator,
            &self.keys,
            &self.validators,
            msg,
            self.height,
        )
    }

    pub fn contribute(
        &mut self,
        id: SessionId,
        participant: &ParticipantId,
        contribution: Vec<u8>,
    ) -> Result<ContributionOutcome> {
        self.coordinator.contribute(id, participant, contribution)
    }

    /// Moves the node to block `height` and applies the expiry tick. Stale heights are ignored.
    pub fn advance_to(&mut self, height: u64) -> Result<Vec<SessionId>> {
        if height < self.height {
            debug!(height, current = self.height, "ignoring stale block height");
            return Ok(Vec::new());
        }
        self.height = height;
        self.coordinator.expire(height)
    }
}

pub type SharedNode = Arc<RwLock<Node>>;

pub fn shared(node: Node) -> SharedNode {
    Arc::new(RwLock::new(node))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub error: String,
}

type ApiError = (Status, Json<ErrorBody>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn api_error(e: TssError) -> ApiError {
    let (status, kind) = match (&e, e.kind()) {
        (TssError::UnknownSession(_), _) => (Status::NotFound, "not_found"),
        (_, ErrorKind::Validation) => (Status::BadRequest, "validation"),
        (_, ErrorKind::Protocol) => (Status::Conflict, "protocol"),
        (_, ErrorKind::Liveness) => (Status::UnprocessableEntity, "liveness"),
        (_, ErrorKind::Internal) => (Status::InternalServerError, "internal"),
    };
    if status == Status::InternalServerError {
        error!(error = %e, "request failed");
    }
    (
        status,
        Json(ErrorBody {
            kind: kind.to_string(),
            error: e.to_string(),
        }),
    )
}

fn not_found(what: String) -> ApiError {
    (
        Status::NotFound,
        Json(ErrorBody {
            kind: "not_found".into(),
            error: what,
        }),
    )
}

fn poisoned<T>(_: T) -> ApiError {
    api_error(TssError::Internal("node state lock poisoned".into()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContributionBody {
    pub participant: ParticipantId,
    #[serde(with = "serde_hex")]
    pub contribution: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub height: u64,
    pub expired: Vec<SessionId>,
}

#[post("/sign", data = "<msg>")]
fn sign(node: &State<SharedNode>, msg: Json<SignRequestMsg>) -> ApiResult<SubmitResponse> {
    let mut node = node.write().map_err(poisoned)?;
    let session_id = node.submit(msg.into_inner()).map_err(api_error)?;
    Ok(Json(SubmitResponse { session_id }))
}

#[post("/sessions/<id>/contributions", data = "<body>")]
fn contribute(
    node: &State<SharedNode>,
    id: u64,
    body: Json<ContributionBody>,
) -> ApiResult<ContributionOutcome> {
    let body = body.into_inner();
    let mut node = node.write().map_err(poisoned)?;
    node.contribute(SessionId(id), &body.participant, body.contribution)
        .map(Json)
        .map_err(api_error)
}

#[post("/blocks/<height>")]
fn block(node: &State<SharedNode>, height: u64) -> ApiResult<BlockResponse> {
    let mut node = node.write().map_err(poisoned)?;
    let expired = node.advance_to(height).map_err(api_error)?;
    Ok(Json(BlockResponse {
        height: node.height(),
        expired,
    }))
}

#[get("/sessions/<id>")]
fn session(node: &State<SharedNode>, id: u64) -> ApiResult<SigningSession> {
    let node = node.read().map_err(poisoned)?;
    node.coordinator()
        .session(SessionId(id))
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown session {}", id)))
}

#[get("/signatures/<id>")]
fn signature(node: &State<SharedNode>, id: u64) -> ApiResult<Signature> {
    let node = node.read().map_err(poisoned)?;
    node.coordinator()
        .signature(SessionId(id))
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no signature for session {}", id)))
}

pub fn build(node: SharedNode) -> Rocket<Build> {
    rocket::build()
        .manage(node)
        .mount("/", routes![sign, contribute, block, session, signature])
}
