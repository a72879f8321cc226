//! Compilation context
//!
//! Owns everything one compilation needs: the options, the bound interface,
//! the ABI engine and table, the clobber analysis and the data objects.
//! `compile` consumes it, so nothing outlives a single unit.
//!
//! Passes run in this order:
//!
//! 1. bind every function signature
//! 2. select every function with a body
//! 3. allocate per call-graph component, callees first, closing the
//!    transitive clobber sets as each component is finished
//! 4. size interrupt save sets and their static save areas
//! 5. emit data, externals, runtime routines, then functions in module order
//! 6. finalize the interface

use log::{debug, info};
use m65_codegen::ClobberSet;
use m65_common::{CompilerError, Result};
use m65_ir::Module;
use std::collections::BTreeMap;

use crate::abi::{AbiEngine, CallGraph, ClobberAnalysis, FunctionAbi};
use crate::function::FunctionBuilder;
use crate::globals::GlobalManager;
use crate::interface::{select_interface, CompiledOutput, FunctionInfo, Interface};
use crate::regmgmt::{AllocatedFunction, RegisterAllocator};
use crate::runtime::{self, Routine};
use crate::select::{CallTarget, InstructionSelector, SelectedFunction};
use crate::CodegenOptions;

pub struct CompilationContext {
    options: CodegenOptions,
    interface: Interface,
    engine: AbiEngine,
}

impl CompilationContext {
    /// Validate the options and resolve the target
    pub fn new(target: &str, options: CodegenOptions) -> Result<Self> {
        options.validate()?;
        let interface = select_interface(target, &options)?;
        let engine = AbiEngine::new(
            options.zero_page.clone(),
            interface.supports_banking(),
            interface.name(),
            options.bank_select,
        );
        Ok(Self {
            options,
            interface,
            engine,
        })
    }

    pub fn target(&self) -> &str {
        self.interface.name()
    }

    fn bind_all(&self, module: &Module) -> Result<BTreeMap<String, FunctionAbi>> {
        let mut abis = BTreeMap::new();
        for function in &module.functions {
            let abi = self.engine.bind(function)?;
            if abis.insert(function.name().to_string(), abi).is_some() {
                return Err(CompilerError::invalid_ir(
                    function.name(),
                    "function defined more than once",
                ));
            }
        }
        Ok(abis)
    }

    /// Everything each call in `selected` may destroy
    fn call_clobbers(
        &self,
        selected: &SelectedFunction,
        clobbers: &ClobberAnalysis,
    ) -> BTreeMap<usize, ClobberSet> {
        let layout = self.engine.layout();
        let select = self.engine.bank_select();
        selected
            .calls
            .iter()
            .map(|(index, target)| {
                let set = match target {
                    CallTarget::Function(name) => clobbers.transitive_or_unknown(name),
                    CallTarget::Trampoline { bank, callee } => {
                        let mut set = Routine::Trampoline(*bank).clobbers(layout, select);
                        set.union_with(&Routine::TrampolineReturn.clobbers(layout, select));
                        set.union_with(&clobbers.transitive_or_unknown(callee));
                        set
                    }
                    CallTarget::Runtime(routine) => routine.clobbers(layout, select),
                    CallTarget::Fixed { clobbers, .. } => clobbers.clone(),
                };
                (*index, set)
            })
            .collect()
    }

    pub fn compile(mut self, module: &Module) -> Result<CompiledOutput> {
        info!(
            "compiling module '{}' for {} ({} functions, {} globals)",
            module.name,
            self.interface.name(),
            module.functions.len(),
            module.globals.len()
        );

        let mut globals = GlobalManager::new();
        for global in &module.globals {
            globals.add_global(global)?;
        }

        let abis = self.bind_all(module)?;

        let selector = InstructionSelector::new(&self.engine, &abis, &self.options.limits);
        let mut selected = BTreeMap::new();
        for function in module.functions.iter().filter(|f| !f.is_external) {
            selected.insert(function.name().to_string(), selector.select(function)?);
        }

        let layout = self.engine.layout().clone();
        let select = self.engine.bank_select();
        let routines = runtime::with_dependencies(selected.values().flat_map(|f| f.runtime.iter().copied()));

        let mut graph = CallGraph::new();
        let mut clobbers = ClobberAnalysis::new(ClobberSet::everything(&layout));
        for function in &module.functions {
            graph.add_node(function.name());
        }
        for (name, function) in &selected {
            for callee in function.callees() {
                graph.add_edge(name, &callee);
            }
        }
        for routine in &routines {
            for dependency in routine.dependencies() {
                graph.add_edge(&routine.name(), &dependency.name());
            }
            clobbers.set_fixed(&routine.name(), routine.clobbers(&layout, select));
        }
        for function in module.functions.iter().filter(|f| f.is_external) {
            let set = abis
                .get(function.name())
                .and_then(FunctionAbi::declared_clobbers)
                .cloned()
                .unwrap_or_else(|| ClobberSet::everything(&layout));
            debug!("external {} clobbers {}", function.name(), set);
            clobbers.set_fixed(function.name(), set);
        }

        let allocator = RegisterAllocator::new(&layout, self.options.trace_allocation);
        let mut allocated: BTreeMap<String, AllocatedFunction> = BTreeMap::new();
        for component in graph.sccs() {
            for name in &component {
                let (Some(function), Some(abi)) = (selected.get(name), abis.get(name)) else {
                    continue;
                };
                let call_clobbers = self.call_clobbers(function, &clobbers);
                let done = allocator.allocate(function, abi, &call_clobbers)?;
                clobbers.set_local(name, done.local_clobbers());
                allocated.insert(name.clone(), done);
            }
            if component.iter().any(|name| selected.contains_key(name)) {
                clobbers.close(&graph, &component);
            }
        }

        let mut saves: BTreeMap<String, ClobberSet> = BTreeMap::new();
        for (name, function) in &allocated {
            let Some(abi) = abis.get(name).filter(|abi| abi.is_interrupt()) else {
                continue;
            };
            let body = clobbers.transitive_or_unknown(name);
            let set = self.engine.interrupt_saves(&body, function.frame_bytes);
            info!("{} handler {} saves {}", abi.interrupt(), name, set);
            globals.add_save_area(name, self.engine.save_area_size(abi, &set))?;
            saves.insert(name.clone(), set);
        }

        for object in globals.objects() {
            self.interface.emit_data(object);
        }
        for function in module.functions.iter().filter(|f| f.is_external) {
            self.interface.emit_external(function.name(), function.address);
        }
        for routine in &routines {
            let name = routine.name();
            self.interface.emit_prologue(&FunctionInfo::routine(&name), &[])?;
            for inst in routine.code(&layout, select) {
                self.interface.emit_instruction(&inst)?;
            }
            self.interface.emit_epilogue(&[])?;
        }

        let no_saves = ClobberSet::new();
        for function in module.functions.iter().filter(|f| !f.is_external) {
            let name = function.name();
            let (Some(done), Some(abi)) = (allocated.get(name), abis.get(name)) else {
                return Err(CompilerError::internal(format!("'{}' was never allocated", name)));
            };
            let mut builder = FunctionBuilder::new(&self.engine, abi, &mut self.interface);
            builder.begin(done.frame_bytes, saves.get(name).unwrap_or(&no_saves))?;
            builder.body(&done.code)?;
            builder.end()?;
            builder.finish()?;
        }

        let output = self.interface.finalize()?;
        info!(
            "{}: {} functions, {} instructions, {} code bytes, {} data bytes",
            output.target,
            output.statistics.functions,
            output.statistics.instructions,
            output.statistics.code_bytes,
            output.statistics.data_bytes
        );
        Ok(output)
    }
}
