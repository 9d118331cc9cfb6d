use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, Pat, Type};

/// Times a fluid system when the `perf_stats` feature is enabled.
///
/// The function body is wrapped in a guard that measures wall time and logs
/// through Bevy's `info!` when the run exceeds the threshold. When the system
/// takes a `tick: Res<SimTick>` parameter the tick number is included in the
/// message and every 100th tick is logged regardless of duration.
///
/// Expands to the untouched function when `perf_stats` is disabled.
///
/// ```ignore
/// #[profile]
/// pub fn step_fluids(tick: Res<SimTick>, mut fluids: ResMut<FluidCoordinator>) { ... }
///
/// #[profile(4)] // threshold in milliseconds
/// pub fn step_fluid_sources(...) { ... }
/// ```
#[proc_macro_attribute]
pub fn profile(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let threshold_ms: u128 = attr.to_string().trim().parse().unwrap_or(1);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = sig.ident.to_string();

    let tick_expr = sig.inputs.iter().find_map(|arg| {
        let FnArg::Typed(pat_type) = arg else { return None };
        let Pat::Ident(pat_ident) = &*pat_type.pat else { return None };
        if pat_ident.ident != "tick" || !mentions_sim_tick(&pat_type.ty) {
            return None;
        }
        let ident = &pat_ident.ident;
        Some(quote!(#ident.0))
    });

    let tick_init = match &tick_expr {
        Some(expr) => quote!(Some(#expr)),
        None => quote!(None),
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #[cfg(feature = "perf_stats")]
            let _profile_guard = {
                struct SystemTimer {
                    name: &'static str,
                    started: std::time::Instant,
                    tick: Option<u64>,
                }
                impl Drop for SystemTimer {
                    fn drop(&mut self) {
                        let elapsed = self.started.elapsed();
                        let periodic = self.tick.is_some_and(|t| t % 100 == 0);
                        if elapsed.as_millis() > #threshold_ms || periodic {
                            match self.tick {
                                Some(t) => bevy::prelude::info!("[PERF] {} (tick {}): {:?}", self.name, t, elapsed),
                                None => bevy::prelude::info!("[PERF] {}: {:?}", self.name, elapsed),
                            }
                        }
                    }
                }
                SystemTimer {
                    name: #name,
                    started: std::time::Instant::now(),
                    tick: #tick_init,
                }
            };

            #block
        }
    };

    output.into()
}

fn mentions_sim_tick(ty: &Type) -> bool {
    quote!(#ty).to_string().contains("SimTick")
}
