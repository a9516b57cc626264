//! Validation controller
//!
//! Orchestrates validation across phases:
//! - a binding seen for the first time collects its validations from every
//!   provider (schema + view) and runs the `load` ones
//! - a change moves the binding to `change` and runs those too
//! - navigation runs everything and manages warning dismissal
//!
//! ```text
//!            load ──► change ──► navigation
//!              └──────────────────────┘
//! ```
//!
//! A navigation is allowed once no blocking error and no undismissed warning
//! remains on a tracked binding.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use super::binding_tracker::{BindingTracker, ValidationBindingTrackerPlugin};
use super::middleware::{MiddlewareVerdict, StrongOrWeakBinding, ValidationMiddleware};
use super::registry::{ValidatorFunction, ValidatorRegistry};
use super::{
    cares_about_data_changes, Blocking, DataTarget, DisplayTarget, Severity, Trigger, ValidationObject,
    ValidationProvider, ValidationResponse, ValidatorContext,
};
use crate::binding::{remove_binding_and_children_from_map, Binding, BindingLike};
use crate::data::{DataModelMiddleware, DataModelOptions, DataModelWithParser, ParseBindingFn, Updates};
use crate::error::Result;
use crate::expression::ExpressionEvaluator;
use crate::hooks::{SyncHook, SyncWaterfallHook};
use crate::schema::{DataType, SchemaController};
use crate::string_resolver::{replace_params, resolve_data_refs_in_string, StringResolveOptions};
use crate::util::to_display_string;
use crate::view::{ViewInstance, ViewPlugin};

/// Called when a warning on a binding is dismissed
pub type DismissCallback = Arc<dyn Fn() + Send + Sync>;

// ═══════════════════════════════════════════════════════════════
// View-facing surface
// ═══════════════════════════════════════════════════════════════

/// Validation access handed to the resolver and its plugins
///
/// The controller provides the data side; the binding tracker wraps it per
/// node to add tracking, sections and roll-ups.
pub trait ViewValidation: Send + Sync {
    /// Every active validation of a binding
    fn validations_for(&self, binding: &Binding) -> Vec<ValidationResponse>;

    /// The validation currently blocking a binding
    fn blocking_validation_for(&self, binding: &Binding) -> Option<ValidationResponse>;

    /// Blocking validations of every tracked binding
    fn get_all(&self) -> HashMap<Binding, ValidationResponse> {
        HashMap::new()
    }

    /// First field-level validation of a binding
    fn get(&self, binding: &Binding, track: bool) -> Option<ValidationResponse> {
        if track {
            self.track(binding);
        }
        self.validations_for(binding)
            .into_iter()
            .find(|v| v.display_target == DisplayTarget::Field)
    }

    fn get_validations_for_binding(&self, binding: &Binding, track: bool) -> Vec<ValidationResponse> {
        if track {
            self.track(binding);
        }
        self.validations_for(binding)
    }

    /// Validations of bindings tracked anywhere below the current node
    fn get_children(&self, _target: Option<DisplayTarget>) -> Vec<ValidationResponse> {
        Vec::new()
    }

    /// Section-level validations of the section the current node registered
    fn get_validations_for_section(&self) -> Vec<ValidationResponse> {
        Vec::new()
    }

    /// Mark the current node as a section (or page)
    fn register(&self, _target: DisplayTarget) {}

    fn track(&self, _binding: &Binding) {}

    /// Schema type of a binding
    fn binding_type(&self, _binding: &Binding) -> Option<DataType> {
        None
    }
}

struct ControllerViewValidation {
    controller: Weak<ValidationController>,
}

impl ViewValidation for ControllerViewValidation {
    fn validations_for(&self, binding: &Binding) -> Vec<ValidationResponse> {
        self.controller
            .upgrade()
            .map(|c| c.get_validations_for_binding(binding))
            .unwrap_or_default()
    }

    fn blocking_validation_for(&self, binding: &Binding) -> Option<ValidationResponse> {
        self.controller.upgrade()?.get_validation_for_binding(binding)
    }

    fn get_all(&self) -> HashMap<Binding, ValidationResponse> {
        let Some(controller) = self.controller.upgrade() else {
            return HashMap::new();
        };
        controller
            .get_bindings()
            .into_iter()
            .filter_map(|b| controller.get_validation_for_binding(&b).map(|v| (b, v)))
            .collect()
    }

    fn binding_type(&self, binding: &Binding) -> Option<DataType> {
        self.controller.upgrade()?.schema.get_type(binding)
    }
}

// ═══════════════════════════════════════════════════════════════
// Per-binding state machine
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum ValidationState {
    None,
    Dismissed,
    Active {
        response: ValidationResponse,
        /// Warnings become dismissable after being shown on a navigation
        dismissable: bool,
    },
}

#[derive(Debug, Clone)]
struct StatefulValidation {
    value: ValidationObject,
    state: ValidationState,
}

impl StatefulValidation {
    fn new(value: ValidationObject) -> Self {
        Self {
            value,
            state: ValidationState::None,
        }
    }
}

/// All declared validations of one binding and how far it has progressed
pub struct ValidatedBinding {
    current_phase: Option<Trigger>,
    applicable: Vec<StatefulValidation>,
    load: Vec<StatefulValidation>,
    change: Vec<StatefulValidation>,
    navigation: Vec<StatefulValidation>,
    /// Bindings the validators read besides the validated one
    pub weak_bindings: HashSet<Binding>,
    on_dismiss: Option<DismissCallback>,
}

impl ValidatedBinding {
    pub fn new(possible: Vec<ValidationObject>, on_dismiss: Option<DismissCallback>) -> Self {
        let mut binding = Self {
            current_phase: None,
            applicable: Vec::new(),
            load: Vec::new(),
            change: Vec::new(),
            navigation: Vec::new(),
            weak_bindings: HashSet::new(),
            on_dismiss,
        };

        for validation in possible {
            let bucket = match validation.trigger() {
                Trigger::Load => &mut binding.load,
                Trigger::Change => &mut binding.change,
                Trigger::Navigation => &mut binding.navigation,
            };
            bucket.push(StatefulValidation::new(validation));
        }

        binding
    }

    pub fn current_phase(&self) -> Option<Trigger> {
        self.current_phase
    }

    /// The first active validation that blocks in the current phase
    pub fn get(&self) -> Option<ValidationResponse> {
        self.applicable.iter().find_map(|v| match &v.state {
            ValidationState::Active { response, .. }
                if self.current_phase != Some(Trigger::Navigation) || v.value.blocking != Some(Blocking::Never) =>
            {
                Some(response.clone())
            }
            _ => None,
        })
    }

    /// Every active validation
    pub fn get_all(&self) -> Vec<ValidationResponse> {
        self.applicable
            .iter()
            .filter_map(|v| match &v.state {
                ValidationState::Active { response, .. } => Some(response.clone()),
                _ => None,
            })
            .collect()
    }

    /// Move to `phase` (never backwards) and run what applies
    ///
    /// Returns the dismiss callback when a warning was dismissed by this run.
    pub fn update(
        &mut self,
        phase: Trigger,
        can_dismiss: bool,
        runner: &mut dyn FnMut(&ValidationObject) -> Result<Option<String>>,
    ) -> Result<Option<DismissCallback>> {
        if phase == Trigger::Load && self.current_phase.is_some() {
            return Ok(None);
        }

        if self.current_phase == Some(Trigger::Navigation) || Some(phase) == self.current_phase {
            return self.run_applicable(runner, can_dismiss);
        }

        match (phase, self.current_phase) {
            (Trigger::Load, _) => {
                self.current_phase = Some(Trigger::Load);
                self.applicable = std::mem::take(&mut self.load);
            }
            (Trigger::Change, Some(Trigger::Load)) => {
                self.current_phase = Some(Trigger::Change);
                self.applicable.append(&mut self.change);
            }
            (Trigger::Navigation, Some(Trigger::Load | Trigger::Change)) => {
                if self.current_phase == Some(Trigger::Load) {
                    self.applicable.append(&mut self.change);
                }
                self.applicable.append(&mut self.navigation);
                self.current_phase = Some(Trigger::Navigation);
            }
            _ => {}
        }

        self.run_applicable(runner, can_dismiss)
    }

    fn run_applicable(
        &mut self,
        runner: &mut dyn FnMut(&ValidationObject) -> Result<Option<String>>,
        can_dismiss: bool,
    ) -> Result<Option<DismissCallback>> {
        let navigating = self.current_phase == Some(Trigger::Navigation);
        let mut dismissed = false;

        for validation in &mut self.applicable {
            let shown_dismissable = match &validation.state {
                ValidationState::Dismissed => continue,
                ValidationState::Active { dismissable, .. } => Some(*dismissable),
                ValidationState::None => None,
            };

            let severity = validation.value.severity();
            let blocking = validation.value.blocking();
            let dismissable = can_dismiss && blocking == Blocking::Once;

            if let (true, true, Some(shown)) = (navigating, dismissable, shown_dismissable) {
                match severity {
                    Severity::Warning if shown => {
                        validation.state = ValidationState::Dismissed;
                        dismissed = true;
                    }
                    Severity::Warning => {
                        if let ValidationState::Active { dismissable, .. } = &mut validation.state {
                            *dismissable = true;
                        }
                    }
                    Severity::Error => validation.state = ValidationState::None,
                }
                continue;
            }

            validation.state = match runner(&validation.value)? {
                Some(message) => ValidationState::Active {
                    response: ValidationResponse {
                        validator: validation.value.validator.clone(),
                        message,
                        severity,
                        trigger: validation.value.trigger(),
                        display_target: validation.value.display_target.unwrap_or_default(),
                        blocking,
                    },
                    dismissable: severity == Severity::Warning && navigating,
                },
                None => ValidationState::None,
            };
        }

        Ok(if dismissed { self.on_dismiss.clone() } else { None })
    }
}

// ═══════════════════════════════════════════════════════════════
// Controller
// ═══════════════════════════════════════════════════════════════

/// What validators run against
#[derive(Clone)]
pub struct ValidatorOptions {
    pub model: Arc<dyn DataModelWithParser>,
    pub evaluator: ExpressionEvaluator,
    pub parse_binding: ParseBindingFn,
}

#[derive(Default)]
pub struct ValidationControllerHooks {
    /// Called once, when the registry is first needed
    pub create_validator_registry: SyncHook<ValidatorRegistry>,
    /// A binding gained a blocking validation
    pub on_add_validation: SyncWaterfallHook<ValidationResponse, Binding>,
    /// A binding lost its blocking validation
    pub on_remove_validation: SyncWaterfallHook<ValidationResponse, Binding>,
}

/// Outcome of validating the whole view
#[derive(Debug, Clone, Default)]
pub struct ViewValidationResult {
    pub can_transition: bool,
    /// Validations preventing the transition
    pub validations: Option<HashMap<Binding, ValidationResponse>>,
}

#[derive(Default)]
struct ControllerState {
    validations: HashMap<Binding, ValidatedBinding>,
    last_active_bindings: HashSet<Binding>,
}

/// Events collected under the state lock, fired after it is released
#[derive(Default)]
struct Deferred {
    dismissed: Vec<DismissCallback>,
    added: Vec<(Binding, ValidationResponse)>,
    removed: Vec<(Binding, ValidationResponse)>,
}

pub struct ValidationController {
    pub hooks: ValidationControllerHooks,
    schema: Arc<SchemaController>,
    options: RwLock<Option<ValidatorOptions>>,
    registry: OnceCell<ValidatorRegistry>,
    view_provider: RwLock<Option<Weak<dyn ValidationProvider>>>,
    tracker: RwLock<Option<Arc<ValidationBindingTrackerPlugin>>>,
    state: Mutex<ControllerState>,
    me: Weak<ValidationController>,
}

impl ValidationController {
    pub fn new(schema: Arc<SchemaController>, options: Option<ValidatorOptions>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            hooks: ValidationControllerHooks::default(),
            schema,
            options: RwLock::new(options),
            registry: OnceCell::new(),
            view_provider: RwLock::new(None),
            tracker: RwLock::new(None),
            state: Mutex::new(ControllerState::default()),
            me: me.clone(),
        })
    }

    pub fn set_options(&self, options: ValidatorOptions) {
        *self.options.write() = Some(options);
    }

    /// Middleware that keeps invalid values out of the committed data
    pub fn get_data_middleware(&self) -> Vec<Arc<dyn DataModelMiddleware>> {
        let me = self.me.clone();
        vec![Arc::new(ValidationMiddleware::new(Arc::new(move |binding, _model| {
            match me.upgrade() {
                Some(controller) => controller.check_binding(binding),
                None => Ok(None),
            }
        })))]
    }

    fn check_binding(&self, binding: &Binding) -> Result<Option<MiddlewareVerdict>> {
        let Some(options) = self.options.read().clone() else {
            return Ok(None);
        };

        self.update_validations_for_binding(binding, Trigger::Change, &options, None)?;

        let state = self.state.lock();
        if let Some(invalid) = state.validations.get(binding).and_then(ValidatedBinding::get) {
            return Ok(Some(MiddlewareVerdict::Invalid(invalid)));
        }

        let changed = HashSet::from([binding.clone()]);
        let mut related = HashSet::new();
        for (owner, validated) in &state.validations {
            let failing = validated.get().is_some_and(|v| v.severity == Severity::Error);
            if failing && cares_about_data_changes(Some(&changed), Some(&validated.weak_bindings)) {
                related.extend(validated.weak_bindings.iter().map(|weak| StrongOrWeakBinding {
                    binding: weak.clone(),
                    is_strong: weak == owner,
                }));
            }
        }

        Ok((!related.is_empty()).then_some(MiddlewareVerdict::Related(related)))
    }

    /// Start tracking a new view
    pub fn on_view(&self, view: &Arc<ViewInstance>) {
        self.state.lock().validations.clear();

        let Some(options) = self.options.read().clone() else {
            return;
        };

        let me = self.me.clone();
        let weak_view = Arc::downgrade(view);
        let tracker = Arc::new(ValidationBindingTrackerPlugin::new(
            options.parse_binding,
            Some(Arc::new(move |binding: &Binding| {
                let Some(controller) = me.upgrade() else {
                    return;
                };
                if let Err(err) = controller.on_binding_added(binding, &weak_view) {
                    warn!(binding = %binding, "Unable to load validations: {err}");
                }
            })),
        ));

        let provider: Arc<dyn ValidationProvider> = view.clone();
        *self.view_provider.write() = Some(Arc::downgrade(&provider));
        *self.tracker.write() = Some(Arc::clone(&tracker));

        tracker.apply(view);
    }

    fn on_binding_added(&self, binding: &Binding, view: &Weak<ViewInstance>) -> Result<()> {
        let Some(options) = self.options.read().clone() else {
            return Ok(());
        };

        if self.state.lock().validations.contains_key(binding) {
            return Ok(());
        }

        let original = options.model.get(binding.into(), &DataModelOptions::default())?;
        let without_default = options.model.get(
            binding.into(),
            &DataModelOptions {
                ignore_default_value: true,
                ..DataModelOptions::default()
            },
        )?;

        if let (Some(original), true) = (&original, original != without_default) {
            options
                .model
                .set(vec![(binding.into(), original.clone())], &DataModelOptions::silent())?;
        }

        let view = view.clone();
        let target = binding.clone();
        let on_dismiss: DismissCallback = Arc::new(move || {
            if let Some(view) = view.upgrade() {
                if let Err(err) = view.update(Some(&HashSet::from([target.clone()]))) {
                    warn!("View update after dismissing a warning failed: {err}");
                }
            }
        });

        self.update_validations_for_binding(binding, Trigger::Load, &options, Some(on_dismiss))
    }

    fn providers(&self) -> Vec<Arc<dyn ValidationProvider>> {
        let mut providers: Vec<Arc<dyn ValidationProvider>> = vec![self.schema.clone()];
        if let Some(view) = self.view_provider.read().as_ref().and_then(Weak::upgrade) {
            providers.push(view);
        }
        providers
    }

    fn update_validations_for_binding(
        &self,
        binding: &Binding,
        trigger: Trigger,
        options: &ValidatorOptions,
        on_dismiss: Option<DismissCallback>,
    ) -> Result<()> {
        let possible: Vec<ValidationObject> = if trigger == Trigger::Load {
            self.providers()
                .iter()
                .flat_map(|p| p.get_validations_for_binding(binding).unwrap_or_default())
                .collect()
        } else {
            Vec::new()
        };

        if trigger == Trigger::Load {
            if possible.is_empty() {
                return Ok(());
            }
            self.state
                .lock()
                .validations
                .insert(binding.clone(), ValidatedBinding::new(possible, on_dismiss));
        }

        let mut deferred = Deferred::default();
        self.run_unlocked(binding, trigger, true, options, &mut deferred)?;

        if trigger != Trigger::Load {
            let changed = HashSet::from([binding.clone()]);
            let owners: Vec<Binding> = self
                .state
                .lock()
                .validations
                .iter()
                .filter(|(owner, validated)| {
                    *owner != binding && cares_about_data_changes(Some(&changed), Some(&validated.weak_bindings))
                })
                .map(|(owner, _)| owner.clone())
                .collect();
            for owner in &owners {
                self.run_unlocked(owner, trigger, true, options, &mut deferred)?;
            }
        }

        self.fire(deferred);
        Ok(())
    }

    /// Run a binding's validators with the state released
    ///
    /// Validators may write to the model, which re-enters the controller
    /// through the data middleware.
    fn run_unlocked(
        &self,
        binding: &Binding,
        trigger: Trigger,
        can_dismiss: bool,
        options: &ValidatorOptions,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let taken = self.state.lock().validations.remove(binding);
        let Some(mut validated) = taken else {
            return Ok(());
        };

        let outcome = self.run_for(binding, &mut validated, trigger, can_dismiss, options, deferred);
        self.state.lock().validations.entry(binding.clone()).or_insert(validated);
        outcome
    }

    /// Update one binding's validations, recording transitions and weak reads
    fn run_for(
        &self,
        binding: &Binding,
        validated: &mut ValidatedBinding,
        trigger: Trigger,
        can_dismiss: bool,
        options: &ValidatorOptions,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let before = validated.get();
        let mut weak = HashSet::new();

        let dismissed = validated.update(trigger, can_dismiss, &mut |obj| {
            let (message, reads) = self.validation_runner(obj, options, binding)?;
            weak.extend(reads);
            Ok(message)
        })?;

        weak.remove(binding);
        validated.weak_bindings.extend(weak);
        deferred.dismissed.extend(dismissed);

        match (before, validated.get()) {
            (None, Some(added)) => deferred.added.push((binding.clone(), added)),
            (Some(removed), None) => deferred.removed.push((binding.clone(), removed)),
            _ => {}
        }

        Ok(())
    }

    fn fire(&self, deferred: Deferred) {
        for (binding, response) in deferred.added {
            self.hooks.on_add_validation.call(response, &binding, &());
        }
        for (binding, response) in deferred.removed {
            self.hooks.on_remove_validation.call(response, &binding, &());
        }
        for callback in deferred.dismissed {
            callback();
        }
    }

    /// Run one validator; returns its message (if failing) and the bindings it read
    fn validation_runner(
        &self,
        validation: &ValidationObject,
        options: &ValidatorOptions,
        binding: &Binding,
    ) -> Result<(Option<String>, HashSet<Binding>)> {
        let Some(handler) = self.get_validator(&validation.validator) else {
            warn!("No validator registered for type: {}", validation.validator);
            return Ok((None, HashSet::new()));
        };

        let recording = Arc::new(RecordingModel {
            inner: Arc::clone(&options.model),
            parse_binding: Arc::clone(&options.parse_binding),
            reads: Mutex::new(HashSet::new()),
        });

        let context = ValidatorContext {
            model: recording.clone(),
            evaluator: &options.evaluator,
            validation,
        };

        let value = options.model.get(
            binding.into(),
            &DataModelOptions {
                include_invalid: true,
                formatted: Some(validation.data_target == Some(DataTarget::Formatted)),
                ..DataModelOptions::default()
            },
        )?;

        let result = handler(&context, value.as_ref(), validation)?;
        let Some(result) = result else {
            return Ok((None, recording.take_reads()));
        };

        let mut message = result.message;
        if let Some(template) = &validation.message {
            let evaluate = |exp: &str| context.evaluate(exp);
            let resolved = resolve_data_refs_in_string(
                template,
                &StringResolveOptions {
                    model: recording.as_ref(),
                    evaluate: &evaluate,
                },
            )?;
            message = to_display_string(&resolved);

            if let Some(parameters) = &result.parameters {
                message = replace_params(&message, parameters);
            }
        }

        Ok((Some(message), recording.take_reads()))
    }

    pub fn get_validator(&self, name: &str) -> Option<ValidatorFunction> {
        self.registry
            .get_or_init(|| {
                let registry = ValidatorRegistry::with_builtins();
                self.hooks.create_validator_registry.call(&registry, &());
                registry
            })
            .get(name)
    }

    fn update_validations_for_view(&self, trigger: Trigger) -> Result<()> {
        let Some(options) = self.options.read().clone() else {
            return Ok(());
        };

        let bindings = self.get_bindings();
        let mut deferred = Deferred::default();

        let can_dismiss = {
            let state = self.state.lock();
            trigger != Trigger::Navigation || state.last_active_bindings == active_bindings(&state, &bindings)
        };

        for binding in &bindings {
            self.run_unlocked(binding, trigger, can_dismiss, &options, &mut deferred)?;
        }

        if trigger == Trigger::Navigation {
            // Failing set after this run, compared on the next navigation
            let mut state = self.state.lock();
            state.last_active_bindings = active_bindings(&state, &bindings);
        }

        self.fire(deferred);
        Ok(())
    }

    /// Forget validations of a deleted binding and everything under it
    ///
    /// Deleting an array element shifts the state of its later siblings down
    /// so it stays with the same elements.
    pub fn on_delete(&self, binding: &Binding) {
        let mut state = self.state.lock();

        let validations = std::mem::take(&mut state.validations);
        state.validations = remove_binding_and_children_from_map(validations, binding);

        let active: HashMap<Binding, ()> = std::mem::take(&mut state.last_active_bindings)
            .into_iter()
            .map(|b| (b, ()))
            .collect();
        state.last_active_bindings = remove_binding_and_children_from_map(active, binding).into_keys().collect();
    }

    /// Bindings tracked in the current view
    pub fn get_bindings(&self) -> HashSet<Binding> {
        self.tracker
            .read()
            .as_ref()
            .map(|t| t.get_bindings())
            .unwrap_or_default()
    }

    /// Run every tracked binding's validations for `trigger`
    pub fn validate_view(&self, trigger: Trigger) -> Result<ViewValidationResult> {
        self.update_validations_for_view(trigger)?;

        let mut validations = HashMap::new();
        for binding in self.get_bindings() {
            if let Some(invalid) = self.get_validation_for_binding(&binding) {
                debug!(
                    "Validation on binding: {} is preventing navigation. {}",
                    binding,
                    serde_json::to_string(&invalid).unwrap_or_default()
                );
                validations.insert(binding, invalid);
            }
        }

        Ok(ViewValidationResult {
            can_transition: validations.is_empty(),
            validations: (!validations.is_empty()).then_some(validations),
        })
    }

    /// The blocking validation of a binding, if any
    pub fn get_validation_for_binding(&self, binding: &Binding) -> Option<ValidationResponse> {
        self.state.lock().validations.get(binding)?.get()
    }

    /// Every active validation of a binding
    pub fn get_validations_for_binding(&self, binding: &Binding) -> Vec<ValidationResponse> {
        self.state
            .lock()
            .validations
            .get(binding)
            .map(ValidatedBinding::get_all)
            .unwrap_or_default()
    }

    /// Phase a binding has reached
    pub fn get_phase(&self, binding: &Binding) -> Option<Trigger> {
        self.state.lock().validations.get(binding)?.current_phase()
    }

    /// The surface handed to the view resolver
    pub fn for_view(&self) -> Arc<dyn ViewValidation> {
        Arc::new(ControllerViewValidation {
            controller: self.me.clone(),
        })
    }
}

impl BindingTracker for ValidationController {
    fn get_bindings(&self) -> HashSet<Binding> {
        ValidationController::get_bindings(self)
    }

    fn track_binding(&self, binding: &Binding) {
        if let Some(tracker) = self.tracker.read().clone() {
            tracker.track_binding(binding);
        }
    }
}

fn active_bindings(state: &ControllerState, bindings: &HashSet<Binding>) -> HashSet<Binding> {
    bindings
        .iter()
        .filter(|b| state.validations.get(*b).and_then(ValidatedBinding::get).is_some())
        .cloned()
        .collect()
}

/// Reads invalid values and remembers every binding a validator touched
struct RecordingModel {
    inner: Arc<dyn DataModelWithParser>,
    parse_binding: ParseBindingFn,
    reads: Mutex<HashSet<Binding>>,
}

impl RecordingModel {
    fn take_reads(&self) -> HashSet<Binding> {
        std::mem::take(&mut *self.reads.lock())
    }
}

impl DataModelWithParser for RecordingModel {
    fn get(&self, binding: BindingLike, options: &DataModelOptions) -> Result<Option<Value>> {
        let parsed = (self.parse_binding)(binding, true)?;
        self.reads.lock().insert(parsed.clone());
        self.inner.get(
            parsed.into(),
            &DataModelOptions {
                include_invalid: true,
                ..options.clone()
            },
        )
    }

    fn set(&self, transaction: Vec<(BindingLike, Value)>, options: &DataModelOptions) -> Result<Updates> {
        self.inner.set(transaction, options)
    }

    fn delete(&self, binding: BindingLike, options: &DataModelOptions) -> Result<()> {
        self.inner.delete(binding, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidatorResult;

    fn rule(validator: &str, severity: Severity, trigger: Trigger) -> ValidationObject {
        let mut obj = ValidationObject::new(validator);
        obj.severity = Some(severity);
        obj.trigger = Some(trigger);
        obj
    }

    fn failing(_: &ValidationObject) -> Result<Option<String>> {
        Ok(Some("bad".to_string()))
    }

    #[test]
    fn phases_only_move_forward() {
        let mut binding = ValidatedBinding::new(
            vec![
                rule("a", Severity::Error, Trigger::Load),
                rule("b", Severity::Error, Trigger::Change),
                rule("c", Severity::Error, Trigger::Navigation),
            ],
            None,
        );

        let mut ran = Vec::new();
        let mut runner = |obj: &ValidationObject| -> Result<Option<String>> {
            ran.push(obj.validator.clone());
            Ok(None)
        };

        binding.update(Trigger::Change, true, &mut runner).unwrap();
        binding.update(Trigger::Load, true, &mut runner).unwrap();
        binding.update(Trigger::Load, true, &mut runner).unwrap();
        binding.update(Trigger::Navigation, true, &mut runner).unwrap();

        assert_eq!(ran, vec!["a", "a", "b", "c"]);
        assert_eq!(binding.current_phase(), Some(Trigger::Navigation));
    }

    #[test]
    fn warnings_are_dismissed_on_the_second_navigation() {
        let dismissed = Arc::new(Mutex::new(0));
        let counter = dismissed.clone();
        let mut binding = ValidatedBinding::new(
            vec![rule("w", Severity::Warning, Trigger::Navigation)],
            Some(Arc::new(move || *counter.lock() += 1)),
        );

        binding.update(Trigger::Load, true, &mut failing).unwrap();
        let first = binding.update(Trigger::Navigation, true, &mut failing).unwrap();
        assert!(first.is_none());
        assert_eq!(binding.get().map(|v| v.severity), Some(Severity::Warning));

        let callback = binding.update(Trigger::Navigation, true, &mut failing).unwrap();
        callback.expect("dismissed")();

        assert!(binding.get().is_none());
        assert_eq!(*dismissed.lock(), 1);
    }

    #[test]
    fn non_blocking_validations_do_not_stop_navigation() {
        let mut obj = rule("e", Severity::Error, Trigger::Load);
        obj.blocking = Some(Blocking::Never);
        let mut binding = ValidatedBinding::new(vec![obj], None);

        binding.update(Trigger::Load, true, &mut failing).unwrap();
        assert!(binding.get().is_some());

        binding.update(Trigger::Navigation, true, &mut failing).unwrap();
        assert!(binding.get().is_none());
        assert_eq!(binding.get_all().len(), 1);
    }

    #[test]
    fn declared_messages_replace_validator_messages() {
        use crate::binding::BindingParser;
        use crate::data::DataController;

        let controller = DataController::new(
            serde_json::json!({"age": 3}),
            Arc::new(BindingParser::new()),
            Vec::new(),
        );
        let evaluator = ExpressionEvaluator::new(controller.clone());
        let validation = ValidationController::new(
            Arc::new(SchemaController::new(None).unwrap()),
            Some(ValidatorOptions {
                model: controller.clone(),
                evaluator,
                parse_binding: controller.parse_binding_fn(),
            }),
        );
        validation.hooks.create_validator_registry.tap("test", |registry, _| {
            registry.register("tooSmall", |_, _, _| {
                Ok(Some(ValidatorResult::new("default").with_parameter("min", serde_json::json!(5))))
            });
        });

        let mut obj = ValidationObject::new("tooSmall");
        obj.message = Some("{{age}} is below %min".into());

        let options = validation.options.read().clone().unwrap();
        let (message, reads) = validation
            .validation_runner(&obj, &options, &Binding::from_dotted("age"))
            .unwrap();

        assert_eq!(message.as_deref(), Some("3 is below 5"));
        assert!(reads.contains(&Binding::from_dotted("age")));
    }

    #[test]
    fn deleting_an_element_shifts_later_validations_down() {
        let validation = ValidationController::new(Arc::new(SchemaController::new(None).unwrap()), None);
        {
            let mut state = validation.state.lock();
            for (path, validator) in [("pets.0.name", "first"), ("pets.1.name", "second"), ("owner", "owner")] {
                let mut validated = ValidatedBinding::new(vec![rule(validator, Severity::Error, Trigger::Load)], None);
                validated.update(Trigger::Load, true, &mut failing).unwrap();
                state.validations.insert(Binding::from_dotted(path), validated);
            }
            state.last_active_bindings.insert(Binding::from_dotted("pets.1.name"));
        }

        validation.on_delete(&Binding::from_dotted("pets.0"));

        let first = Binding::from_dotted("pets.0.name");
        assert_eq!(
            validation.get_validation_for_binding(&first).map(|v| v.validator),
            Some("second".to_string())
        );
        assert!(validation.get_phase(&Binding::from_dotted("pets.1.name")).is_none());
        assert!(validation.state.lock().last_active_bindings.contains(&first));

        validation.on_delete(&Binding::from_dotted("pets"));
        assert!(validation.get_phase(&first).is_none());
        assert!(validation.state.lock().last_active_bindings.is_empty());
        assert!(validation.get_validation_for_binding(&Binding::from_dotted("owner")).is_some());
    }
}
