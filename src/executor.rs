//! Evaluation of recovered module source
//!
//! The default executor runs Rhai script. Every top-level variable left in
//! scope becomes a module attribute and every script function becomes a module
//! function. `import "pkg.other" as other;` inside a script resolves through
//! the same [`ImportSystem`], so encrypted modules can import each other.

use crate::import::ImportSystem;
use crate::module::Module;
use crate::{LoaderError, LoaderResult};
use rhai::{
    Dynamic, Engine, EvalAltResult, FuncArgs, ModuleResolver, Position, Scope, Shared,
};

/// Evaluates module source into a module namespace
pub trait ScriptExecutor: Send + Sync {
    /// Run `source` as the body of `module`
    fn execute(&self, module: &mut Module, source: &str, imports: &ImportSystem)
        -> LoaderResult<()>;
}

/// Rhai-backed executor
#[derive(Debug, Clone, Default)]
pub struct RhaiExecutor {
    /// Operation budget per module body; `0` means unlimited
    max_operations: u64,
}

impl RhaiExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of operations a module body may run
    pub fn with_max_operations(mut self, max: u64) -> Self {
        self.max_operations = max;
        self
    }

    /// Create a Rhai engine with logging hooks registered
    fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.on_print(|msg| {
            tracing::info!(target: "aurora_loader::script", "{}", msg);
        });
        engine.on_debug(|msg, source, pos| {
            tracing::debug!(
                target: "aurora_loader::script",
                "{} @ {:?}: {}",
                source.unwrap_or("<module>"),
                pos,
                msg
            );
        });

        if self.max_operations > 0 {
            engine.set_max_operations(self.max_operations);
        }

        engine
    }

    /// Call a script function defined by `module`
    pub fn call_fn<T: Clone + Send + Sync + 'static>(
        &self,
        module: &Module,
        name: &str,
        args: impl FuncArgs,
    ) -> LoaderResult<T> {
        let ast = module
            .functions()
            .filter(|_| module.has_function(name))
            .ok_or_else(|| {
                LoaderError::execution(module.name(), format!("no function named '{}'", name))
            })?;

        self.create_engine()
            .call_fn::<T>(&mut Scope::new(), ast, name, args)
            .map_err(|e| LoaderError::execution(module.name(), e.to_string()))
    }
}

impl ScriptExecutor for RhaiExecutor {
    fn execute(
        &self,
        module: &mut Module,
        source: &str,
        imports: &ImportSystem,
    ) -> LoaderResult<()> {
        let mut engine = self.create_engine();
        engine.set_module_resolver(ImportBridge {
            imports: imports.clone(),
        });

        let ast = engine
            .compile(source)
            .map_err(|e| LoaderError::execution(module.name(), e.to_string()))?;

        let mut scope = Scope::new();
        scope.push_constant("__name__", module.name().to_string());

        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| LoaderError::execution(module.name(), e.to_string()))?;

        for (name, _, value) in scope.iter() {
            if name.starts_with("__") {
                continue;
            }
            module.set_attr(name, value);
        }
        module.set_functions(ast.clone_functions_only());

        Ok(())
    }
}

/// Routes script `import` statements back into the import system
struct ImportBridge {
    imports: ImportSystem,
}

impl ModuleResolver for ImportBridge {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<rhai::Module>, Box<EvalAltResult>> {
        let module = self.imports.import(path).map_err(|e| match e {
            LoaderError::ModuleNotFound(_) => {
                Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos))
            }
            other => Box::new(EvalAltResult::ErrorInModule(
                path.to_string(),
                Box::new(EvalAltResult::ErrorRuntime(
                    Dynamic::from(other.to_string()),
                    pos,
                )),
                pos,
            )),
        })?;

        let mut exported = match module.functions() {
            Some(ast) => rhai::Module::eval_ast_as_new(Scope::new(), ast, engine)?,
            None => rhai::Module::new(),
        };
        for (name, value) in module.attributes() {
            exported.set_var(name, value.clone());
        }
        exported.build_index();

        Ok(Shared::new(exported))
    }
}
