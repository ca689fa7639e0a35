/// `scripting/libsox.rs` — the `libsox` module table
///
/// Each function converts its Lua arguments, forwards to the matching libsox
/// entry point and converts the result back:
///   native failure code -> false, NULL -> nil,
///   wrong handle kind   -> raised `type_error`.
///
/// Handles are typed userdata; a script never sees a raw address.

use std::{ffi::CString, rc::Rc};

use mlua::{
    Function, IntoLua, Lua, Result as LuaResult, Table, UserData, UserDataRef,
    UserDataRefMut, Value, Variadic,
};

use crate::sox::{
    self, EffectArg, Effect, EffectHandler, EffectsChain, Format, SampleBuffer, SoxError,
    SoxLoader,
};

/// Global and `package.loaded` name of the module.
pub const MODULE_NAME: &str = "libsox";

impl UserData for SampleBuffer {}
impl UserData for Format {}
impl UserData for EffectsChain {}
impl UserData for Effect {}
impl UserData for EffectHandler {}

// ── Argument helpers ──────────────────────────────────────────────────────────

fn type_error(func: &'static str, kind: &'static str) -> mlua::Error {
    SoxError::TypeError(format!("Invalid argument ({func}: expected {kind})")).into()
}

fn handle<T: 'static>(func: &'static str, kind: &'static str, v: &Value) -> LuaResult<UserDataRef<T>> {
    match v {
        Value::UserData(ud) if ud.is::<T>() => ud.borrow::<T>(),
        _ => Err(type_error(func, kind)),
    }
}

fn handle_mut<T: 'static>(
    func: &'static str,
    kind: &'static str,
    v: &Value,
) -> LuaResult<UserDataRefMut<T>> {
    match v {
        Value::UserData(ud) if ud.is::<T>() => ud.borrow_mut::<T>(),
        _ => Err(type_error(func, kind)),
    }
}

fn format_arg(func: &'static str, v: &Value) -> LuaResult<UserDataRef<Format>> {
    handle(func, "format", v)
}

fn buffer_arg(func: &'static str, v: &Value) -> LuaResult<UserDataRef<SampleBuffer>> {
    handle(func, "buffer", v)
}

fn chain_arg(func: &'static str, v: &Value) -> LuaResult<UserDataRef<EffectsChain>> {
    handle(func, "effects chain", v)
}

fn effect_arg(func: &'static str, v: &Value) -> LuaResult<UserDataRef<Effect>> {
    handle(func, "effect", v)
}

/// Non-negative integer argument as `usize`.
fn count(func: &'static str, what: &str, n: i64) -> Result<usize, SoxError> {
    usize::try_from(n)
        .map_err(|_| SoxError::invalid_argument(func, format!("{what} must be >= 0, got {n}")))
}

/// Insert one key into a result table.
fn map_insert(tbl: &Table, key: &str, value: impl IntoLua) -> LuaResult<()> {
    tbl.set(key, value)
}

/// Register one native function on the module table.
fn bind_member(module: &Table, name: &str, f: Function) -> LuaResult<()> {
    module.set(name, f)
}

// ── Registration ──────────────────────────────────────────────────────────────

/// Build the `libsox` table, publish it as a global and in `package.loaded`
/// (when the package library is open), and return it.
pub fn register_libsox(
    lua: &Lua,
    loader: Rc<SoxLoader>,
    default_buffer_size: usize,
) -> LuaResult<Table> {
    let module = lua.create_table()?;

    register_lifecycle(lua, &module, &loader)?;
    register_buffers(lua, &module, default_buffer_size)?;
    register_introspection(lua, &module)?;
    register_effects(lua, &module, &loader)?;
    register_sessions(lua, &module, &loader)?;

    lua.globals().set(MODULE_NAME, module.clone())?;
    let package: Value = lua.globals().get("package")?;
    if let Value::Table(package) = package {
        let loaded: Table = package.get("loaded")?;
        loaded.set(MODULE_NAME, module.clone())?;
    }
    Ok(module)
}

// ── version / init / quit ─────────────────────────────────────────────────────

fn register_lifecycle(lua: &Lua, module: &Table, loader: &Rc<SoxLoader>) -> LuaResult<()> {
    let l = Rc::clone(loader);
    bind_member(
        module,
        "version",
        lua.create_function(move |_, ()| Ok(l.get()?.version()))?,
    )?;

    let l = Rc::clone(loader);
    bind_member(
        module,
        "init",
        lua.create_function(move |_, ()| Ok(l.get()?.init()))?,
    )?;

    let l = Rc::clone(loader);
    bind_member(
        module,
        "quit",
        lua.create_function(move |_, ()| Ok(l.get()?.quit()))?,
    )?;
    Ok(())
}

// ── buffer / free_buffer / conversion / get_levels ───────────────────────────

fn register_buffers(lua: &Lua, module: &Table, default_size: usize) -> LuaResult<()> {
    bind_member(
        module,
        "buffer",
        lua.create_function(move |_, size: Option<i64>| {
            let len = match size {
                Some(n) => count("buffer", "size", n)?,
                None => default_size,
            };
            Ok(SampleBuffer::new(len))
        })?,
    )?;

    bind_member(
        module,
        "free_buffer",
        lua.create_function(|_, buf: Value| {
            let mut buf = handle_mut::<SampleBuffer>("free_buffer", "buffer", &buf)?;
            buf.free()?;
            Ok(())
        })?,
    )?;

    // Returns the converted sample and the updated clip count.
    bind_member(
        module,
        "sample_to_float32",
        lua.create_function(|_, (buf, index, clips): (Value, i64, Option<i64>)| {
            let buf = buffer_arg("sample_to_float32", &buf)?;
            let s = buf.get("sample_to_float32", count("sample_to_float32", "index", index)?)?;
            let mut clips = count("sample_to_float32", "clips", clips.unwrap_or(0))? as u64;
            let v = sox::sample_to_f32(s, &mut clips);
            Ok((v as f64, clips as i64))
        })?,
    )?;

    bind_member(
        module,
        "sample_to_float64",
        lua.create_function(|_, (buf, index): (Value, i64)| {
            let buf = buffer_arg("sample_to_float64", &buf)?;
            let s = buf.get("sample_to_float64", count("sample_to_float64", "index", index)?)?;
            Ok(sox::sample_to_f64(s))
        })?,
    )?;

    // { right, left }
    bind_member(
        module,
        "get_levels",
        lua.create_function(|lua, (buf, block_size): (Value, i64)| {
            let buf = buffer_arg("get_levels", &buf)?;
            let block = buf.prefix("get_levels", count("get_levels", "block_size", block_size)?)?;
            let levels = sox::levels(block);
            lua.create_sequence_from([levels.right, levels.left])
        })?,
    )?;
    Ok(())
}

// ── signal / encoding ─────────────────────────────────────────────────────────

fn register_introspection(lua: &Lua, module: &Table) -> LuaResult<()> {
    bind_member(
        module,
        "signal",
        lua.create_function(|lua, ft: Value| {
            let ft = format_arg("signal", &ft)?;
            let s = ft.signal()?;
            let tbl = lua.create_table()?;
            map_insert(&tbl, "channels", s.channels)?;
            map_insert(&tbl, "length", s.length as i64)?;
            map_insert(&tbl, "precision", s.precision)?;
            map_insert(&tbl, "rate", s.rate)?;
            Ok(tbl)
        })?,
    )?;

    bind_member(
        module,
        "encoding",
        lua.create_function(|lua, ft: Value| {
            let ft = format_arg("encoding", &ft)?;
            let e = ft.encoding()?;
            let tbl = lua.create_table()?;
            map_insert(&tbl, "bits_per_sample", e.bits_per_sample)?;
            map_insert(&tbl, "compression", e.compression)?;
            map_insert(&tbl, "encoding", e.encoding)?;
            map_insert(&tbl, "opposite_endian", e.opposite_endian)?;
            Ok(tbl)
        })?,
    )?;
    Ok(())
}

// ── effects chain ─────────────────────────────────────────────────────────────

/// Owned form of one `effect_options` argument, held while the call runs.
enum OptionArg {
    Str(CString),
    Format(UserDataRef<Format>),
}

fn register_effects(lua: &Lua, module: &Table, loader: &Rc<SoxLoader>) -> LuaResult<()> {
    bind_member(
        module,
        "create_effects_chain",
        lua.create_function(|_, (input, output): (Value, Value)| {
            let input = format_arg("create_effects_chain", &input)?;
            let output = format_arg("create_effects_chain", &output)?;
            Ok(EffectsChain::create(&input, &output)?)
        })?,
    )?;

    let l = Rc::clone(loader);
    bind_member(
        module,
        "find_effect",
        lua.create_function(move |_, name: String| Ok(l.get()?.find_effect(&name)?))?,
    )?;

    bind_member(
        module,
        "create_effect",
        lua.create_function(|_, eh: Value| {
            let eh = handle::<EffectHandler>("create_effect", "effect handler", &eh)?;
            Ok(eh.create_effect())
        })?,
    )?;

    // effect_options(effect, argc, ...): forwards the first `argc` trailing
    // arguments. Strings pass through; format handles pass as the session
    // pointer the `input`/`output` effects expect.
    bind_member(
        module,
        "effect_options",
        lua.create_function(|_, (effp, argc, argv): (Value, i64, Variadic<Value>)| {
            let effp = effect_arg("effect_options", &effp)?;
            let argc = count("effect_options", "argc", argc)?;
            if argc > argv.len() {
                return Err(SoxError::invalid_argument(
                    "effect_options",
                    format!("argc is {argc} but {} arguments were given", argv.len()),
                )
                .into());
            }

            let owned = argv[..argc]
                .iter()
                .map(|v| match v {
                    Value::String(s) => CString::new(s.as_bytes().to_vec())
                        .map(OptionArg::Str)
                        .map_err(|_| {
                            mlua::Error::from(SoxError::invalid_argument(
                                "effect_options",
                                "string contains NUL",
                            ))
                        }),
                    Value::UserData(_) => format_arg("effect_options", v).map(OptionArg::Format),
                    _ => Err(type_error("effect_options", "string or format")),
                })
                .collect::<LuaResult<Vec<_>>>()?;

            let args: Vec<EffectArg<'_>> = owned
                .iter()
                .map(|a| match a {
                    OptionArg::Str(s) => EffectArg::Str(s.as_c_str()),
                    OptionArg::Format(f) => EffectArg::Format(f),
                })
                .collect();

            Ok(effp.options(&args)?)
        })?,
    )?;

    bind_member(
        module,
        "add_effect",
        lua.create_function(|_, (chain, effp, input, output): (Value, Value, Value, Value)| {
            let chain = chain_arg("add_effect", &chain)?;
            let effp = effect_arg("add_effect", &effp)?;
            let input = format_arg("add_effect", &input)?;
            let output = format_arg("add_effect", &output)?;
            Ok(chain.add_effect(&effp, &input, &output)?)
        })?,
    )?;

    bind_member(
        module,
        "flow_effects",
        lua.create_function(|_, chain: Value| {
            let chain = chain_arg("flow_effects", &chain)?;
            Ok(chain.flow()?)
        })?,
    )?;

    bind_member(
        module,
        "delete_effects_chain",
        lua.create_function(|_, chain: Value| {
            let chain = chain_arg("delete_effects_chain", &chain)?;
            chain.delete()?;
            Ok(())
        })?,
    )?;
    Ok(())
}

// ── file sessions ─────────────────────────────────────────────────────────────

fn register_sessions(lua: &Lua, module: &Table, loader: &Rc<SoxLoader>) -> LuaResult<()> {
    let l = Rc::clone(loader);
    bind_member(
        module,
        "open_read",
        lua.create_function(move |_, path: String| Ok(l.get()?.open_read(&path)?))?,
    )?;

    bind_member(
        module,
        "read",
        lua.create_function(|_, (ft, buf, len): (Value, Value, i64)| {
            let ft = format_arg("read", &ft)?;
            let mut buf = handle_mut::<SampleBuffer>("read", "buffer", &buf)?;
            let n = ft.read(&mut buf, count("read", "len", len)?)?;
            Ok(n as i64)
        })?,
    )?;

    let l = Rc::clone(loader);
    bind_member(
        module,
        "open_write",
        lua.create_function(
            move |_, (path, source, filetype): (String, Value, Option<String>)| {
                let signal = match &source {
                    Value::Table(_) => {
                        return Err(SoxError::TypeError(
                            "signal tables are not supported yet".to_string(),
                        )
                        .into())
                    }
                    other => format_arg("open_write", other)?.raw_signal()?,
                };
                Ok(l.get()?.open_write(&path, &signal, filetype.as_deref())?)
            },
        )?,
    )?;

    bind_member(
        module,
        "write",
        lua.create_function(|_, (ft, buf, len): (Value, Value, i64)| {
            let ft = format_arg("write", &ft)?;
            let buf = buffer_arg("write", &buf)?;
            let n = ft.write(&buf, count("write", "len", len)?)?;
            Ok(n as i64)
        })?,
    )?;

    bind_member(
        module,
        "seek",
        lua.create_function(|_, (ft, offset): (Value, i64)| {
            let ft = format_arg("seek", &ft)?;
            let offset = count("seek", "offset", offset)? as u64;
            Ok(ft.seek(offset)?)
        })?,
    )?;

    bind_member(
        module,
        "close",
        lua.create_function(|_, ft: Value| {
            let ft = format_arg("close", &ft)?;
            Ok(ft.close()?)
        })?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::scripting::sandbox::{create_sandboxed_vm, TrustLevel};
    use crate::sox::ffi::{SoxSample, SOX_SAMPLE_MAX, SOX_SAMPLE_MIN};

    /// VM with the module registered against a library path that never loads.
    fn vm() -> Lua {
        vm_with(TrustLevel::Basic)
    }

    fn vm_with(trust: TrustLevel) -> Lua {
        let lua = create_sandboxed_vm(trust).unwrap();
        let loader = Rc::new(SoxLoader::new(Some(PathBuf::from("/nonexistent/libsox.so"))));
        register_libsox(&lua, loader, 32768).unwrap();
        lua
    }

    fn with_buffer(lua: &Lua, samples: Vec<SoxSample>) {
        lua.globals()
            .set("buf", SampleBuffer::from_samples(samples))
            .unwrap();
    }

    fn eval<T: mlua::FromLuaMulti>(lua: &Lua, src: &str) -> LuaResult<T> {
        lua.load(src).eval::<T>()
    }

    #[test]
    fn module_exposes_every_function() {
        let lua = vm();
        let module: Table = lua.globals().get(MODULE_NAME).unwrap();
        for name in [
            "version", "init", "quit", "buffer", "free_buffer", "sample_to_float32",
            "sample_to_float64", "get_levels", "signal", "encoding", "create_effects_chain",
            "create_effect", "find_effect", "effect_options", "add_effect", "flow_effects",
            "delete_effects_chain", "open_read", "read", "open_write", "write", "seek", "close",
        ] {
            let f: Value = module.get(name).unwrap();
            assert!(matches!(f, Value::Function(_)), "missing libsox.{name}");
        }
    }

    #[test]
    fn require_returns_the_module_when_package_is_open() {
        let lua = vm_with(TrustLevel::Elevated);
        let same: bool = eval(&lua, "return require('libsox') == libsox").unwrap();
        assert!(same);
    }

    #[test]
    fn zero_sized_buffer_can_be_freed() {
        let lua = vm();
        lua.load("local b = libsox.buffer(0); libsox.free_buffer(b)")
            .exec()
            .unwrap();
    }

    #[test]
    fn default_buffer_holds_32768_samples() {
        let lua = vm();
        let levels: Vec<i64> = eval(&lua, "return libsox.get_levels(libsox.buffer(), 32768)").unwrap();
        assert_eq!(levels, vec![35, 35]);
        let err = lua
            .load("libsox.get_levels(libsox.buffer(), 32769)")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("out of bounds"), "{err}");
    }

    #[test]
    fn negative_buffer_size_is_rejected() {
        let lua = vm();
        assert!(lua.load("libsox.buffer(-1)").exec().is_err());
    }

    #[test]
    fn freed_buffer_cannot_be_reused() {
        let lua = vm();
        let err = lua
            .load("local b = libsox.buffer(8); libsox.free_buffer(b); libsox.sample_to_float64(b, 0)")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("already released"), "{err}");
    }

    #[test]
    fn float64_conversion_hits_full_scale() {
        let lua = vm();
        with_buffer(&lua, vec![SOX_SAMPLE_MAX, SOX_SAMPLE_MIN, 0]);
        let (hi, lo, zero): (f64, f64, f64) = eval(
            &lua,
            "return libsox.sample_to_float64(buf, 0), libsox.sample_to_float64(buf, 1), libsox.sample_to_float64(buf, 2)",
        )
        .unwrap();
        assert!((hi - 1.0).abs() < 1e-6);
        assert!((lo + 1.0).abs() < 1e-9);
        assert_eq!(zero, 0.0);
    }

    #[test]
    fn float32_conversion_threads_clip_count() {
        let lua = vm();
        with_buffer(&lua, vec![SOX_SAMPLE_MAX, 0, SOX_SAMPLE_MAX]);
        let clips: i64 = eval(
            &lua,
            r#"
            local clips = 0
            for i = 0, 2 do
                local _, c = libsox.sample_to_float32(buf, i, clips)
                clips = c
            end
            return clips
            "#,
        )
        .unwrap();
        assert_eq!(clips, 2);
    }

    #[test]
    fn index_past_end_raises() {
        let lua = vm();
        with_buffer(&lua, vec![0; 4]);
        assert!(lua.load("libsox.sample_to_float64(buf, 4)").exec().is_err());
        assert!(lua.load("libsox.sample_to_float64(buf, -1)").exec().is_err());
    }

    #[test]
    fn levels_full_scale_read_zero() {
        let lua = vm();
        with_buffer(&lua, vec![SOX_SAMPLE_MAX; 16]);
        let levels: Vec<i64> = eval(&lua, "return libsox.get_levels(buf, 16)").unwrap();
        assert_eq!(levels, vec![0, 0]);
    }

    #[test]
    fn levels_negative_full_scale_match_positive() {
        let lua = vm();
        with_buffer(&lua, vec![SOX_SAMPLE_MIN; 16]);
        let levels: Vec<i64> = eval(&lua, "return libsox.get_levels(buf, 16)").unwrap();
        assert_eq!(levels, vec![0, 0]);
    }

    #[test]
    fn levels_return_right_before_left() {
        let lua = vm();
        // Right channel (odd indices) at full scale, left silent.
        let samples = (0..16).map(|i| if i % 2 == 1 { SOX_SAMPLE_MAX } else { 0 }).collect();
        with_buffer(&lua, samples);
        let (right, left): (i64, i64) =
            eval(&lua, "local l = libsox.get_levels(buf, 16); return l[1], l[2]").unwrap();
        assert_eq!((right, left), (0, 35));
    }

    #[test]
    fn close_rejects_non_handles() {
        let lua = vm();
        for arg in ["42", "'file.wav'", "{}", "nil", "libsox.buffer(1)"] {
            let err = lua
                .load(format!("libsox.close({arg})"))
                .exec()
                .unwrap_err();
            assert!(err.to_string().contains("type_error"), "close({arg}): {err}");
        }
    }

    #[test]
    fn write_and_read_reject_non_handles() {
        let lua = vm();
        with_buffer(&lua, vec![0; 4]);
        for src in [
            "libsox.write(1, buf, 4)",
            "libsox.write(buf, buf, 4)",
            "libsox.read('x', buf, 4)",
            "libsox.seek({}, 0)",
            "libsox.signal(buf)",
            "libsox.encoding(true)",
        ] {
            let err = lua.load(src).exec().unwrap_err();
            assert!(err.to_string().contains("type_error"), "{src}: {err}");
        }
    }

    #[test]
    fn effect_calls_reject_wrong_handle_kinds() {
        let lua = vm();
        with_buffer(&lua, vec![0; 4]);
        for src in [
            "libsox.create_effect('vol')",
            "libsox.effect_options(buf, 0)",
            "libsox.add_effect(buf, buf, buf, buf)",
            "libsox.flow_effects(42)",
            "libsox.delete_effects_chain(buf)",
            "libsox.create_effects_chain(buf, buf)",
        ] {
            let err = lua.load(src).exec().unwrap_err();
            assert!(err.to_string().contains("type_error"), "{src}: {err}");
        }
    }

    #[test]
    fn buffer_handle_passes_type_check() {
        let lua = vm();
        lua.load("local b = libsox.buffer(2); libsox.get_levels(b, 2); libsox.free_buffer(b)")
            .exec()
            .unwrap();
    }

    #[test]
    fn open_write_rejects_signal_tables() {
        let lua = vm();
        let err = lua
            .load("libsox.open_write('out.wav', { rate = 44100, channels = 2, precision = 16 })")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("type_error"), "{err}");
        assert!(err.to_string().contains("not supported"), "{err}");
    }

    #[test]
    fn native_calls_report_missing_library() {
        let lua = vm();
        let err = lua.load("libsox.version()").exec().unwrap_err();
        assert!(err.to_string().contains("libsox not available"), "{err}");
    }

    // ── Against the in-process stub library ─────────────────────────────────

    #[cfg(unix)]
    mod stubbed {
        use super::*;
        use crate::sox::library::fake::{self, CHAINS_DELETED, CLOSED};

        fn stub_vm() -> Lua {
            let lua = create_sandboxed_vm(TrustLevel::Basic).unwrap();
            register_libsox(&lua, fake::loader(), 32768).unwrap();
            lua
        }

        #[test]
        fn format_handles_pass_type_checks() {
            let lua = stub_vm();
            lua.load(
                r#"
                local ft = assert(libsox.open_read("tone.wav"))
                local buf = libsox.buffer(8)
                assert(libsox.read(ft, buf, 8) == 0)
                assert(libsox.seek(ft, 0))
                assert(libsox.encoding(ft).bits_per_sample == 16)
                local out = assert(libsox.open_write("copy.wav", ft))
                assert(libsox.write(out, buf, 8) == 8)
                assert(libsox.close(out))
                assert(libsox.close(ft))
                "#,
            )
            .exec()
            .unwrap();
            assert_eq!(fake::count(&CLOSED), 2);
        }

        #[test]
        fn open_write_copies_signal_of_source() {
            let lua = stub_vm();
            let (channels, rate, precision): (i64, f64, i64) = eval(
                &lua,
                r#"
                local input = libsox.open_read("tone.wav")
                local output = libsox.open_write("copy.wav", input, "wav")
                local s = libsox.signal(output)
                libsox.close(output)
                libsox.close(input)
                return s.channels, s.rate, s.precision
                "#,
            )
            .unwrap();
            assert_eq!((channels, rate, precision), (2, 44100.0, 16));
        }

        #[test]
        fn unopenable_file_is_nil() {
            let lua = stub_vm();
            let missing: bool = eval(&lua, "return libsox.open_read('missing.wav') == nil").unwrap();
            assert!(missing);
        }

        #[test]
        fn closed_format_cannot_be_read() {
            let lua = stub_vm();
            let err = lua
                .load("local ft = libsox.open_read('a.wav'); libsox.close(ft); libsox.read(ft, libsox.buffer(4), 4)")
                .exec()
                .unwrap_err();
            assert!(err.to_string().contains("format already released"), "{err}");
        }

        #[test]
        fn effects_chain_round_trip() {
            let lua = stub_vm();
            lua.load(
                r#"
                local input = libsox.open_read("tone.wav")
                local output = libsox.open_write("out.wav", input)
                local chain = assert(libsox.create_effects_chain(input, output))
                assert(libsox.find_effect("nope") == nil)
                local e = assert(libsox.create_effect(libsox.find_effect("vol")))
                assert(libsox.effect_options(e, 1, "0.5", "ignored") == 0)
                assert(libsox.add_effect(chain, e, input, output))
                assert(libsox.flow_effects(chain))
                libsox.delete_effects_chain(chain)
                libsox.close(output)
                libsox.close(input)
                "#,
            )
            .exec()
            .unwrap();
            assert_eq!(fake::count(&CHAINS_DELETED), 1);
        }

        #[test]
        fn effect_options_argc_past_arguments_raises() {
            let lua = stub_vm();
            let err = lua
                .load("local e = libsox.create_effect(libsox.find_effect('vol')); libsox.effect_options(e, 2, '0.5')")
                .exec()
                .unwrap_err();
            assert!(err.to_string().contains("argc is 2"), "{err}");
        }

        #[test]
        fn sessions_left_open_after_quit_are_not_closed() {
            let lua = stub_vm();
            lua.load("opened = libsox.open_read('tone.wav'); assert(libsox.quit())")
                .exec()
                .unwrap();
            drop(lua);
            assert_eq!(fake::count(&CLOSED), 0);
        }

        #[test]
        fn sessions_left_open_are_closed_with_the_vm() {
            let lua = stub_vm();
            lua.load("opened = libsox.open_read('tone.wav')").exec().unwrap();
            drop(lua);
            assert_eq!(fake::count(&CLOSED), 1);
        }
    }

    // ── Against a real libsox ────────────────────────────────────────────────

    /// VM bound to the system libsox, with `src`/`dst` globals naming a
    /// generated stereo 16-bit 44.1 kHz WAV and an output path.
    fn native_vm(dir: &std::path::Path) -> Lua {
        let src = dir.join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&src, spec).unwrap();
        for i in 0..4410 {
            let v = ((i as f32 * 0.0626).sin() * 16000.0) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v / 2).unwrap();
        }
        writer.finalize().unwrap();

        let lua = create_sandboxed_vm(TrustLevel::Basic).unwrap();
        register_libsox(&lua, Rc::new(SoxLoader::new(None)), 32768).unwrap();
        let g = lua.globals();
        g.set("src", src.display().to_string()).unwrap();
        g.set("dst", dir.join("copy.wav").display().to_string()).unwrap();
        lua.load("assert(libsox.init())").exec().unwrap();
        lua
    }

    #[test]
    #[ignore = "requires libsox shared library"]
    fn copy_loop_preserves_signal() {
        let dir = tempfile::tempdir().unwrap();
        let lua = native_vm(dir.path());
        let (channels, rate, precision, total): (i64, f64, i64, i64) = eval(
            &lua,
            r#"
            local input = assert(libsox.open_read(src))
            local output = assert(libsox.open_write(dst, input))
            local s = libsox.signal(output)
            assert(s.channels == 2 and s.rate == 44100 and s.precision == 16)
            local buf = libsox.buffer(1024)
            local total = 0
            while true do
                local n = libsox.read(input, buf, 1024)
                if n == 0 then break end
                assert(libsox.write(output, buf, n) == n)
                total = total + n
            end
            assert(libsox.close(output))
            assert(libsox.close(input))
            libsox.free_buffer(buf)

            local copy = assert(libsox.open_read(dst))
            local s = libsox.signal(copy)
            libsox.close(copy)
            return s.channels, s.rate, s.precision, total
            "#,
        )
        .unwrap();
        assert_eq!((channels, rate, precision, total), (2, 44100.0, 16, 8820));

        let reader = hound::WavReader::open(dir.path().join("copy.wav")).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 8820);
    }

    #[test]
    #[ignore = "requires libsox shared library"]
    fn second_close_raises() {
        let dir = tempfile::tempdir().unwrap();
        let lua = native_vm(dir.path());
        let err = lua
            .load("local f = libsox.open_read(src); libsox.close(f); libsox.close(f)")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("already released"), "{err}");
    }

    #[test]
    #[ignore = "requires libsox shared library"]
    fn effects_chain_flows_through_vol() {
        let dir = tempfile::tempdir().unwrap();
        let lua = native_vm(dir.path());
        lua.load(
            r#"
            local input = assert(libsox.open_read(src))
            local output = assert(libsox.open_write(dst, input))
            local chain = assert(libsox.create_effects_chain(input, output))

            local e = libsox.create_effect(libsox.find_effect("input"))
            assert(libsox.effect_options(e, 1, input) == 0)
            assert(libsox.add_effect(chain, e, input, input))

            e = libsox.create_effect(libsox.find_effect("vol"))
            assert(libsox.effect_options(e, 1, "0.5") == 0)
            assert(libsox.add_effect(chain, e, input, input))

            e = libsox.create_effect(libsox.find_effect("output"))
            assert(libsox.effect_options(e, 1, output) == 0)
            assert(libsox.add_effect(chain, e, input, output))

            assert(libsox.flow_effects(chain))
            libsox.delete_effects_chain(chain)
            libsox.close(output)
            libsox.close(input)
            "#,
        )
        .exec()
        .unwrap();

        let mut reader = hound::WavReader::open(dir.path().join("copy.wav")).unwrap();
        let peak = reader
            .samples::<i16>()
            .map(|s| s.unwrap().unsigned_abs())
            .max()
            .unwrap();
        assert!(peak <= 8100, "vol 0.5 should halve the peak, got {peak}");
    }

    #[test]
    #[ignore = "requires libsox shared library"]
    fn unknown_effect_is_nil() {
        let dir = tempfile::tempdir().unwrap();
        let lua = native_vm(dir.path());
        let missing: bool = eval(&lua, "return libsox.find_effect('no-such-effect') == nil").unwrap();
        assert!(missing);
        let version: String = eval(&lua, "return libsox.version()").unwrap();
        assert!(version.starts_with("14."), "{version}");
    }
}
