//! Resource operations and the hook orchestrator
//!
//! Every operation runs the same life cycle:
//!
//! ```text
//! BUILD_CONTEXT -> RUN_PRE_HOOKS -> EXECUTE_STORE_OPERATION -> RUN_POST_HOOKS -> EMIT_RESPONSE
//!                       |                                           |
//!                       +--------------> CANCELLED / FAILED <-------+
//! ```
//!
//! Request input is parsed and validated while building the context, before
//! any transaction opens. Write operations then open a transaction that spans
//! the pre-hooks, the store call and the post-hooks; any failure in that scope
//! rolls everything back.

use crate::config::{ConfigLayer, ConfigStack, OperationConfig, OperationKind};
use crate::core::alias::FieldAliases;
use crate::core::constraint::{ConstraintParser, FieldPath, FilterClause, OrderClause};
use crate::core::entity::EntityDescriptor;
use crate::core::error::{BadRequestError, ConfigError, NotFoundError, ResourceError, ResourceResult};
use crate::core::flatten::FlatteningPlan;
use crate::core::identifier::IdentifierMapper;
use crate::core::query::{PagingMeta, ResourceQuery};
use crate::core::store::{EntityStore, IncludeSpec, Paging, Record, StoreQuery, Transaction};
use crate::core::validation::{WriteMode, validate_payload};
use crate::operation::context::{OperationContext, PipelineState};
use crate::operation::hooks::HookList;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Decoded HTTP input of one operation
#[derive(Debug, Clone, Default)]
pub struct ResourceRequest {
    /// External id from the path, for single/update/patch/destroy
    pub id: Option<String>,
    /// Query-string parameters
    pub params: HashMap<String, String>,
    pub body: Value,
}

impl ResourceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

/// Status and JSON body of one operation
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl From<ResourceError> for ResourceResponse {
    fn from(err: ResourceError) -> Self {
        if !err.is_client_error() {
            tracing::error!(error = %err, "resource operation failed");
        }
        Self {
            status: err.status_code(),
            body: err.to_body(),
        }
    }
}

impl IntoResponse for ResourceResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Per-request translation state derived from the resolved configuration
struct Shaping<'a> {
    aliases: FieldAliases,
    flattening: FlatteningPlan,
    flattened: IndexMap<String, FieldPath>,
    includes: Vec<IncludeSpec>,
    mapper: IdentifierMapper<'a>,
}

impl<'a> Shaping<'a> {
    fn new(
        entity: &'a EntityDescriptor,
        store: &'a dyn EntityStore,
        config: &OperationConfig,
    ) -> ResourceResult<Self> {
        let registry = store.registry();
        let mut includes = config.include.clone();
        let flattening = FlatteningPlan::build(entity, registry, &config.flattening, &mut includes)?;
        Ok(Self {
            aliases: FieldAliases::new(&config.field_aliases),
            flattened: flattening.paths(),
            flattening,
            includes,
            mapper: IdentifierMapper::new(entity, registry, config)?,
        })
    }

    fn parser<'p>(
        &'p self,
        entity: &'p EntityDescriptor,
        store: &'p dyn EntityStore,
        config: &'p OperationConfig,
    ) -> ConstraintParser<'p> {
        self.mapper.relations().iter().fold(
            ConstraintParser::new(entity, store.registry(), config, &self.aliases, &self.flattened),
            |parser, mapping| parser.with_external_type(&mapping.foreign_key, mapping.external_type),
        )
    }

    /// Internal store rows to client records
    async fn outbound(
        &self,
        store: &dyn EntityStore,
        mut rows: Vec<Record>,
        tx: Option<&Transaction>,
    ) -> ResourceResult<Vec<Record>> {
        self.mapper.outbound_relations(store, &mut rows, tx).await?;
        for row in rows.iter_mut() {
            self.mapper.outbound_includes(row, &self.includes);
            self.mapper.outbound_id(row);
        }
        let mut rows = self.flattening.apply(rows);
        for row in rows.iter_mut() {
            self.aliases.outbound(row);
        }
        Ok(rows)
    }

    /// Client write payload to internal attribute names
    fn inbound_payload(&self, parser: &ConstraintParser<'_>, body: &Value) -> ResourceResult<Record> {
        let payload = match body {
            Value::Object(map) => map.clone(),
            _ => {
                return Err(BadRequestError::InvalidBody {
                    message: "expected a JSON object".to_string(),
                }
                .into());
            }
        };
        for field in payload.keys() {
            parser.check_write_field(field)?;
        }

        let mut payload = self.aliases.inbound(payload);
        let id_attribute = self.mapper.id_attribute();
        if id_attribute != "id"
            && let Some(id) = payload.shift_remove("id")
        {
            payload.entry(id_attribute.to_string()).or_insert(id);
        }
        Ok(payload)
    }
}

/// One mounted entity with the resolved configuration of each operation
pub struct Resource {
    entity: Arc<EntityDescriptor>,
    store: Arc<dyn EntityStore>,
    configs: HashMap<OperationKind, Arc<OperationConfig>>,
}

impl Resource {
    /// Resolve configuration for every operation once, at mount time
    pub fn new(
        store: Arc<dyn EntityStore>,
        entity: &str,
        stack: &ConfigStack,
        context: Option<&str>,
        overrides: &HashMap<OperationKind, ConfigLayer>,
    ) -> Result<Self, ConfigError> {
        let entity = store.registry().require(entity)?.clone();
        let configs = OperationKind::ALL
            .iter()
            .map(|kind| {
                stack
                    .resolve(*kind, &entity, context, overrides.get(kind))
                    .map(|config| (*kind, Arc::new(config)))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self {
            entity,
            store,
            configs,
        })
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    pub fn config(&self, kind: OperationKind) -> Option<&OperationConfig> {
        self.configs.get(&kind).map(|c| c.as_ref())
    }

    pub async fn list(&self, request: ResourceRequest) -> ResourceResponse {
        self.execute(OperationKind::List, request).await
    }

    pub async fn search(&self, request: ResourceRequest) -> ResourceResponse {
        self.execute(OperationKind::Search, request).await
    }

    pub async fn single(&self, request: ResourceRequest) -> ResourceResponse {
        self.execute(OperationKind::Single, request).await
    }

    pub async fn create(&self, request: ResourceRequest) -> ResourceResponse {
        self.execute(OperationKind::Create, request).await
    }

    pub async fn update(&self, request: ResourceRequest) -> ResourceResponse {
        self.execute(OperationKind::Update, request).await
    }

    pub async fn patch(&self, request: ResourceRequest) -> ResourceResponse {
        self.execute(OperationKind::Patch, request).await
    }

    pub async fn destroy(&self, request: ResourceRequest) -> ResourceResponse {
        self.execute(OperationKind::Destroy, request).await
    }

    /// Run one operation through the full life cycle
    pub async fn execute(&self, kind: OperationKind, request: ResourceRequest) -> ResourceResponse {
        let Some(config) = self.configs.get(&kind).cloned() else {
            return ResourceError::Internal(format!("operation {kind} is not configured")).into();
        };

        let mut params = request.params.clone();
        if let Some(id) = &request.id {
            params.insert("id".to_string(), id.clone());
        }
        let mut ctx = OperationContext::new(
            kind,
            self.entity.clone(),
            self.store.clone(),
            config.clone(),
            params,
            request.body.clone(),
        );

        let shaping = match Shaping::new(&self.entity, self.store.as_ref(), &config) {
            Ok(shaping) => shaping,
            Err(err) => return self.fail(&mut ctx, err).await,
        };
        let prepared = match self.prepare(kind, &shaping, &config, &request).await {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(&mut ctx, err).await,
        };

        if kind.is_write() {
            match self.store.begin().await {
                Ok(tx) => ctx.set_transaction(Some(tx)),
                Err(err) => return self.fail(&mut ctx, err.into()).await,
            }
        }

        ctx.set_state(PipelineState::RunPreHooks);
        match self.run_hooks(&config.pre, &mut ctx, true).await {
            Ok(true) => {}
            Ok(false) => return self.cancel(&mut ctx).await,
            Err(err) => return self.fail(&mut ctx, err).await,
        }

        ctx.set_state(PipelineState::ExecuteStoreOperation);
        let status = match self.perform(&shaping, &config, &mut ctx, prepared).await {
            Ok(status) => status,
            Err(err) => return self.fail(&mut ctx, err).await,
        };

        ctx.set_state(PipelineState::RunPostHooks);
        match self.run_hooks(&config.post, &mut ctx, false).await {
            Ok(true) => {}
            Ok(false) => return self.cancel(&mut ctx).await,
            Err(err) => return self.fail(&mut ctx, err).await,
        }

        if let Some(tx) = ctx.take_transaction()
            && let Err(err) = self.store.commit(tx).await
        {
            return self.fail(&mut ctx, err.into()).await;
        }

        ctx.set_state(PipelineState::EmitResponse);
        ResourceResponse {
            status,
            body: Value::Object(std::mem::take(&mut ctx.payload)),
        }
    }

    /// Run hooks in declared order; `Ok(false)` means a hook cancelled
    async fn run_hooks(&self, hooks: &HookList, ctx: &mut OperationContext, pre: bool) -> ResourceResult<bool> {
        for hook in hooks.iter() {
            let returned = hook.call(ctx).await.map_err(ResourceError::from)?;
            if pre {
                ctx.pre_result = returned;
            }
            if ctx.is_cancelled() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn rollback(&self, ctx: &mut OperationContext) {
        if let Some(tx) = ctx.take_transaction()
            && let Err(err) = self.store.rollback(tx).await
        {
            tracing::error!(error = %err, entity = %self.entity.name, "rollback failed");
        }
    }

    async fn cancel(&self, ctx: &mut OperationContext) -> ResourceResponse {
        ctx.set_state(PipelineState::Cancelled);
        self.rollback(ctx).await;
        let (status, body) = ctx
            .take_cancellation()
            .unwrap_or((StatusCode::OK, Value::Null));
        ResourceResponse { status, body }
    }

    async fn fail(&self, ctx: &mut OperationContext, err: ResourceError) -> ResourceResponse {
        ctx.set_state(PipelineState::Failed);
        self.rollback(ctx).await;
        err.into()
    }

    /// Parse and validate request input; nothing here touches a transaction
    async fn prepare(
        &self,
        kind: OperationKind,
        shaping: &Shaping<'_>,
        config: &OperationConfig,
        request: &ResourceRequest,
    ) -> ResourceResult<Prepared> {
        let parser = shaping.parser(&self.entity, self.store.as_ref(), config);

        match kind {
            OperationKind::List | OperationKind::Search => {
                let query = if kind == OperationKind::List {
                    ResourceQuery::from_query_params(&request.params)?
                } else {
                    ResourceQuery::from_search_body(&request.body)?
                };

                let mut filters =
                    parser.parse_filters(query.filters.iter().map(|(k, v)| (k.as_str(), v)))?;
                let requested = filters.clone();

                let direction = query.order_dir.unwrap_or(config.default_order_dir);
                let order = match query.order_by.as_deref().filter(|o| !o.trim().is_empty()) {
                    Some(order_by) => parser.parse_order(order_by, direction)?,
                    None => parser
                        .default_order(&config.default_order_by, direction)
                        .into_iter()
                        .collect(),
                };

                let satisfiable = shaping
                    .mapper
                    .inbound_filters(self.store.as_ref(), &mut filters, None)
                    .await?;

                Ok(Prepared::Collection {
                    filters,
                    requested,
                    order,
                    paging: query.paging(config.page_size),
                    page: query.page(),
                    satisfiable,
                })
            }
            OperationKind::Create => Ok(Prepared::Create {
                payload: shaping.inbound_payload(&parser, &request.body)?,
            }),
            OperationKind::Single
            | OperationKind::Update
            | OperationKind::Patch
            | OperationKind::Destroy => {
                let id = request
                    .id
                    .as_deref()
                    .ok_or_else(|| BadRequestError::InvalidParameter {
                        name: "id".to_string(),
                        message: "missing record id".to_string(),
                    })?;
                let payload = matches!(kind, OperationKind::Update | OperationKind::Patch)
                    .then(|| shaping.inbound_payload(&parser, &request.body))
                    .transpose()?;
                Ok(Prepared::Keyed {
                    id: id.to_string(),
                    key_filter: shaping.mapper.key_filter(id)?,
                    payload,
                })
            }
        }
    }

    /// The store call and response envelope of each operation
    async fn perform(
        &self,
        shaping: &Shaping<'_>,
        config: &OperationConfig,
        ctx: &mut OperationContext,
        prepared: Prepared,
    ) -> ResourceResult<StatusCode> {
        let store = self.store.as_ref();
        let entity = self.entity.name.as_str();
        let tx = ctx.transaction().cloned();
        let tx = tx.as_ref();

        match prepared {
            Prepared::Collection {
                mut filters,
                requested,
                order,
                paging,
                page,
                satisfiable,
            } => {
                let (rows, total) = if satisfiable {
                    filters.extend(ctx.constraints().iter().cloned());
                    let query = StoreQuery {
                        filters,
                        order: order.clone(),
                        paging: Some(paging),
                        include: shaping.includes.clone(),
                    };
                    let found = store.query(entity, &query, None).await?;
                    (found.rows, found.total)
                } else {
                    (Vec::new(), 0)
                };

                let data: Vec<Value> = shaping
                    .outbound(store, rows, None)
                    .await?
                    .into_iter()
                    .map(Value::Object)
                    .collect();

                let mut meta = Map::new();
                meta.insert(
                    "paging".to_string(),
                    json!(PagingMeta::new(page, paging.limit, total)),
                );
                if config.meta_show_filtering {
                    meta.insert(
                        "filtering".to_string(),
                        requested.iter().map(FilterClause::to_meta).collect(),
                    );
                }
                if config.meta_show_ordering {
                    meta.insert(
                        "ordering".to_string(),
                        order.iter().map(OrderClause::to_meta).collect(),
                    );
                }

                ctx.set_result(Value::Array(data.clone()));
                ctx.payload.insert("success".to_string(), Value::Bool(true));
                ctx.payload.insert("data".to_string(), Value::Array(data));
                ctx.payload.insert("meta".to_string(), Value::Object(meta));
                Ok(StatusCode::OK)
            }

            Prepared::Keyed {
                id,
                key_filter,
                payload,
            } => {
                let kind = ctx.kind();
                let mut filters = vec![key_filter];
                filters.extend(ctx.constraints().iter().cloned());
                let query = StoreQuery {
                    filters,
                    order: Vec::new(),
                    paging: Some(Paging { offset: 0, limit: 1 }),
                    include: if kind == OperationKind::Single {
                        shaping.includes.clone()
                    } else {
                        Vec::new()
                    },
                };
                let not_found = || NotFoundError::Record {
                    entity: entity.to_string(),
                    id: id.clone(),
                };
                let row = store
                    .query(entity, &query, tx)
                    .await?
                    .rows
                    .into_iter()
                    .next()
                    .ok_or_else(not_found)?;

                if kind == OperationKind::Single {
                    let record = shaping
                        .outbound(store, vec![row], None)
                        .await?
                        .into_iter()
                        .next()
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    ctx.set_result(record.clone());
                    ctx.payload.insert("success".to_string(), Value::Bool(true));
                    ctx.payload.insert("record".to_string(), record);
                    return Ok(StatusCode::OK);
                }

                let primary_key = self.entity.primary_key();
                let key = row.get(primary_key).cloned().ok_or_else(|| {
                    ResourceError::Internal(format!("{entity} row without primary key '{primary_key}'"))
                })?;

                if kind == OperationKind::Destroy {
                    if !store.delete(entity, &key, tx).await? {
                        return Err(not_found().into());
                    }
                    ctx.set_result(Value::Object(row));
                    ctx.payload.insert("success".to_string(), Value::Bool(true));
                    return Ok(StatusCode::OK);
                }

                let mode = if kind == OperationKind::Update {
                    WriteMode::Replace
                } else {
                    WriteMode::Patch
                };
                let mut values = payload.unwrap_or_default();
                values.shift_remove(primary_key);

                // a full replacement keeps the external id unless it is rewritten
                let id_attribute = shaping.mapper.id_attribute();
                if mode == WriteMode::Replace
                    && id_attribute != primary_key
                    && !values.contains_key(id_attribute)
                    && let Some(current) = row.get(id_attribute)
                {
                    values.insert(id_attribute.to_string(), current.clone());
                }

                let values = self.finish_payload(shaping, ctx, values, mode, tx).await?;
                let updated = store
                    .update(entity, &key, values, tx)
                    .await?
                    .ok_or_else(not_found)?;

                ctx.set_result(Value::Object(updated));
                ctx.payload.insert("success".to_string(), Value::Bool(true));
                Ok(StatusCode::OK)
            }

            Prepared::Create { payload } => {
                let values = self
                    .finish_payload(shaping, ctx, payload, WriteMode::Create, tx)
                    .await?;
                let created = store.create(entity, values, tx).await?;
                let id = created
                    .get(shaping.mapper.id_attribute())
                    .cloned()
                    .unwrap_or(Value::Null);

                ctx.set_result(Value::Object(created));
                ctx.payload.insert("success".to_string(), Value::Bool(true));
                ctx.payload.insert("id".to_string(), id);
                Ok(StatusCode::CREATED)
            }
        }
    }

    /// Resolve related ids, apply injected values, then validate
    ///
    /// Values injected by hooks are internal and bypass relation mapping.
    async fn finish_payload(
        &self,
        shaping: &Shaping<'_>,
        ctx: &OperationContext,
        mut values: Record,
        mode: WriteMode,
        tx: Option<&Transaction>,
    ) -> ResourceResult<Record> {
        shaping
            .mapper
            .inbound_payload(self.store.as_ref(), &mut values, tx)
            .await?;
        for (field, value) in ctx.values() {
            values.insert(field.clone(), value.clone());
        }
        Ok(validate_payload(&self.entity, values, mode)?)
    }
}

/// Validated request input, ready for the store call
enum Prepared {
    Collection {
        filters: Vec<FilterClause>,
        /// Client filters before key translation, echoed in `meta.filtering`
        requested: Vec<FilterClause>,
        order: Vec<OrderClause>,
        paging: Paging,
        page: usize,
        satisfiable: bool,
    },
    Keyed {
        id: String,
        key_filter: FilterClause,
        payload: Option<Record>,
    },
    Create {
        payload: Record,
    },
}
