//! A native plugin exercising every kind of entry point the loader resolves.

use hotswap_kernel::{Symbol, declare_symbols, export};

declare_symbols! {
    hotswap_on_load => Symbol::on_load(|_| Ok(())),
    hotswap_on_init => Symbol::on_init(|vault| {
        vault.set_data("greeter", export("ready".to_string()));
        Ok(())
    }),
    hotswap_on_free => Symbol::on_free(|| {}),
    hotswap_export => Symbol::export(|| Some(export("greeter".to_string()))),
    hotswap_import => Symbol::import(|| None),
    hotswap_invoke => Symbol::invoke(|name, _| Ok(Some(export(format!("hello, {name}"))))),
    hotswap_reloadable => Symbol::reloadable(|| true),
    hotswap_live_funcs => Symbol::Nil,
    build_tag => Symbol::value(export("greeter-1".to_string())),
}
