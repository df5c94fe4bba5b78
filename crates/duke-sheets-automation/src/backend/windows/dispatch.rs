//! Late-bound `IDispatch` access, the way VBScript talks to Excel.

use std::mem::ManuallyDrop;
use std::ptr;

use windows::{
    core::{IUnknown, Interface, BSTR, GUID, HSTRING, PCWSTR},
    Win32::{
        Foundation::{DISP_E_EXCEPTION, DISP_E_PARAMNOTFOUND, VARIANT_BOOL},
        Globalization::GetSystemDefaultLCID,
        System::{
            Com::{
                CLSIDFromProgID, CoCreateInstance, IDispatch, IGlobalInterfaceTable,
                StdGlobalInterfaceTable, CLSCTX_INPROC_SERVER, CLSCTX_LOCAL_SERVER, DISPATCH_FLAGS,
                DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO,
            },
            Ole::{GetActiveObject, DISPID_PROPERTYPUT},
            Variant::{
                VARIANT, VT_BOOL, VT_BSTR, VT_DISPATCH, VT_EMPTY, VT_ERROR, VT_I2, VT_I4, VT_NULL,
                VT_R4, VT_R8,
            },
        },
    },
};

use super::ComError;

/// HRESULTs meaning the server side is gone or was never there
const UNAVAILABLE_HRESULTS: [u32; 7] = [
    0x800401F3, // CO_E_CLASSSTRING: ProgID not registered
    0x80040154, // REGDB_E_CLASSNOTREG
    0x80080005, // CO_E_SERVER_EXEC_FAILURE
    0x800401E3, // MK_E_UNAVAILABLE: nothing in the running object table
    0x80010108, // RPC_E_DISCONNECTED
    0x800706BA, // RPC_S_SERVER_UNAVAILABLE
    0x800706BE, // RPC_S_CALL_FAILED
];

// -- VARIANT construction helpers --
// The VARIANT struct wraps inner unions in ManuallyDrop, so fields are set
// with ptr::write.

pub fn variant_empty() -> VARIANT {
    VARIANT::default()
}

pub fn variant_bool(val: bool) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BOOL);
        ptr::write(
            &mut inner.Anonymous.boolVal,
            VARIANT_BOOL(if val { -1 } else { 0 }),
        );
        v
    }
}

pub fn variant_f64(val: f64) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_R8);
        ptr::write(&mut inner.Anonymous.dblVal, val);
        v
    }
}

pub fn variant_i32(val: i32) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_I4);
        ptr::write(&mut inner.Anonymous.lVal, val);
        v
    }
}

pub fn variant_str(val: &str) -> VARIANT {
    unsafe {
        let bstr = BSTR::from(val);
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BSTR);
        ptr::write(&mut inner.Anonymous.bstrVal, ManuallyDrop::new(bstr));
        v
    }
}

/// Pass an object (a Range, a PivotTable) as an argument
pub fn variant_dispatch(obj: &DispatchObject) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_DISPATCH);
        ptr::write(
            &mut inner.Anonymous.pdispVal,
            ManuallyDrop::new(Some(obj.inner.clone())),
        );
        v
    }
}

/// An omitted optional argument
pub fn variant_missing() -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_ERROR);
        ptr::write(&mut inner.Anonymous.scode, DISP_E_PARAMNOTFOUND.0);
        v
    }
}

pub fn variant_vt(v: &VARIANT) -> u16 {
    unsafe { v.Anonymous.Anonymous.vt.0 }
}

pub fn variant_get_bool(v: &VARIANT) -> Option<bool> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BOOL {
            Some(v.Anonymous.Anonymous.Anonymous.boolVal.0 != 0)
        } else {
            None
        }
    }
}

pub fn variant_get_f64(v: &VARIANT) -> Option<f64> {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        let anon = &v.Anonymous.Anonymous.Anonymous;
        if vt == VT_R8 {
            Some(anon.dblVal)
        } else if vt == VT_R4 {
            Some(anon.fltVal as f64)
        } else if vt == VT_I4 {
            Some(anon.lVal as f64)
        } else if vt == VT_I2 {
            Some(anon.iVal as f64)
        } else {
            None
        }
    }
}

pub fn variant_get_string(v: &VARIANT) -> Option<String> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BSTR {
            let bstr = &v.Anonymous.Anonymous.Anonymous.bstrVal;
            Some(bstr.to_string())
        } else {
            None
        }
    }
}

/// SCODE of a `VT_ERROR` variant (Excel's `CVErr` values live here)
pub fn variant_get_error(v: &VARIANT) -> Option<i32> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_ERROR {
            Some(v.Anonymous.Anonymous.Anonymous.scode)
        } else {
            None
        }
    }
}

pub fn variant_get_dispatch(v: &VARIANT) -> Option<IDispatch> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_DISPATCH {
            let opt_disp: &Option<IDispatch> = &v.Anonymous.Anonymous.Anonymous.pdispVal;
            opt_disp.clone()
        } else {
            None
        }
    }
}

pub fn variant_is_empty(v: &VARIANT) -> bool {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        vt == VT_EMPTY || vt == VT_NULL
    }
}

// -- DispatchObject --

/// An `IDispatch` COM object
#[derive(Clone)]
pub struct DispatchObject {
    inner: IDispatch,
}

impl DispatchObject {
    /// Start a new server instance from a ProgID (e.g. "Excel.Application")
    pub fn create_from_progid(progid: &str) -> Result<Self, ComError> {
        unsafe {
            let clsid = clsid(progid)?;
            let disp: IDispatch = CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER)
                .map_err(|e| com_error("CoCreateInstance", &e, None))?;
            Ok(Self { inner: disp })
        }
    }

    /// Attach to a running instance registered in the running object table
    pub fn active(progid: &str) -> Result<Self, ComError> {
        unsafe {
            let clsid = clsid(progid)?;
            let mut unknown: Option<IUnknown> = None;
            GetActiveObject(&clsid, None, &mut unknown)
                .map_err(|e| com_error("GetActiveObject", &e, None))?;
            let unknown = unknown.ok_or_else(|| {
                ComError::Unavailable(format!("no running instance of {progid}"))
            })?;
            let disp: IDispatch = unknown
                .cast()
                .map_err(|e| com_error("QueryInterface(IDispatch)", &e, None))?;
            Ok(Self { inner: disp })
        }
    }

    fn from_idispatch(disp: IDispatch) -> Self {
        Self { inner: disp }
    }

    /// Register this object in the process-wide global interface table.
    ///
    /// The returned cookie lets any other apartment obtain its own proxy to
    /// the same server object with [`DispatchObject::from_shared`].
    pub fn share(&self) -> Result<u32, ComError> {
        unsafe {
            global_table()?
                .RegisterInterfaceInGlobal(&self.inner, &IDispatch::IID)
                .map_err(|e| com_error("RegisterInterfaceInGlobal", &e, None))
        }
    }

    /// A proxy, valid in the calling apartment, to an object registered with `share`
    pub fn from_shared(cookie: u32) -> Result<Self, ComError> {
        unsafe {
            let disp: IDispatch = global_table()?
                .GetInterfaceFromGlobal(cookie)
                .map_err(|e| com_error("GetInterfaceFromGlobal", &e, None))?;
            Ok(Self { inner: disp })
        }
    }

    /// Drop the table's reference; the cookie is dead afterwards
    pub fn revoke_shared(cookie: u32) -> Result<(), ComError> {
        unsafe {
            global_table()?
                .RevokeInterfaceFromGlobal(cookie)
                .map_err(|e| com_error("RevokeInterfaceFromGlobal", &e, None))
        }
    }

    fn get_dispid(&self, name: &str) -> Result<i32, ComError> {
        unsafe {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            let names = [PCWSTR(wide.as_ptr())];
            let mut dispid = 0i32;
            self.inner
                .GetIDsOfNames(
                    &GUID::zeroed(),
                    names.as_ptr(),
                    1,
                    GetSystemDefaultLCID(),
                    &mut dispid,
                )
                .map_err(|e| com_error(name, &e, None))?;
            Ok(dispid)
        }
    }

    fn invoke(
        &self,
        name: &str,
        flags: DISPATCH_FLAGS,
        args: &[VARIANT],
    ) -> Result<VARIANT, ComError> {
        let dispid = self.get_dispid(name)?;
        unsafe {
            // DISPPARAMS takes arguments last-to-first
            let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
            let params = DISPPARAMS {
                rgvarg: if reversed.is_empty() {
                    std::ptr::null_mut()
                } else {
                    reversed.as_mut_ptr()
                },
                rgdispidNamedArgs: std::ptr::null_mut(),
                cArgs: reversed.len() as u32,
                cNamedArgs: 0,
            };
            let mut result = VARIANT::default();
            let mut except = EXCEPINFO::default();
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    flags,
                    &params,
                    Some(&mut result),
                    Some(&mut except),
                    None,
                )
                .map_err(|e| com_error(name, &e, Some(&except)))?;
            Ok(result)
        }
    }

    /// `obj.Name`
    pub fn get_property(&self, name: &str) -> Result<VARIANT, ComError> {
        self.invoke(name, DISPATCH_PROPERTYGET, &[])
    }

    /// `obj.Name = value`
    pub fn set_property(&self, name: &str, value: VARIANT) -> Result<(), ComError> {
        let dispid = self.get_dispid(name)?;
        unsafe {
            let mut args = [value];
            let mut named_args = [DISPID_PROPERTYPUT];
            let params = DISPPARAMS {
                rgvarg: args.as_mut_ptr(),
                rgdispidNamedArgs: named_args.as_mut_ptr(),
                cArgs: 1,
                cNamedArgs: 1,
            };
            let mut except = EXCEPINFO::default();
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    DISPATCH_PROPERTYPUT,
                    &params,
                    None,
                    Some(&mut except),
                    None,
                )
                .map_err(|e| com_error(name, &e, Some(&except)))?;
            Ok(())
        }
    }

    /// `obj.Name(args...)`, arguments in natural order
    pub fn invoke_method(&self, name: &str, args: &[VARIANT]) -> Result<VARIANT, ComError> {
        self.invoke(name, DISPATCH_METHOD, args)
    }

    /// Property that returns an object
    pub fn get_child(&self, name: &str) -> Result<DispatchObject, ComError> {
        let variant = self.get_property(name)?;
        extract_dispatch(&variant, name)
    }

    /// Method that returns an object
    pub fn invoke_child(&self, name: &str, args: &[VARIANT]) -> Result<DispatchObject, ComError> {
        let variant = self.invoke_method(name, args)?;
        extract_dispatch(&variant, name)
    }

    /// Parameterized member that returns an object: `Worksheets(1)`,
    /// `Range("A1")`, `Cells(2, 3)`
    pub fn get_indexed(&self, name: &str, args: &[VARIANT]) -> Result<DispatchObject, ComError> {
        let flags = DISPATCH_FLAGS(DISPATCH_METHOD.0 | DISPATCH_PROPERTYGET.0);
        let variant = self.invoke(name, flags, args)?;
        extract_dispatch(&variant, name)
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, ComError> {
        let variant = self.get_property(name)?;
        variant_get_f64(&variant).ok_or_else(|| ComError::Call {
            member: name.to_string(),
            message: format!("expected a number, got VT={}", variant_vt(&variant)),
        })
    }

    pub fn get_string(&self, name: &str) -> Result<String, ComError> {
        let variant = self.get_property(name)?;
        Ok(variant_get_string(&variant).unwrap_or_default())
    }
}

unsafe fn clsid(progid: &str) -> Result<GUID, ComError> {
    let hstr = HSTRING::from(progid);
    CLSIDFromProgID(&hstr).map_err(|e| com_error("CLSIDFromProgID", &e, None))
}

fn extract_dispatch(variant: &VARIANT, context: &str) -> Result<DispatchObject, ComError> {
    if let Some(disp) = variant_get_dispatch(variant) {
        Ok(DispatchObject::from_idispatch(disp))
    } else if variant_is_empty(variant) {
        Err(ComError::Call {
            member: context.to_string(),
            message: "returned nothing".to_string(),
        })
    } else {
        Err(ComError::Call {
            member: context.to_string(),
            message: format!(
                "returned a non-object VARIANT (VT={}), expected VT_DISPATCH",
                variant_vt(variant)
            ),
        })
    }
}

/// Classify a failed call. The HRESULT itself stays here.
/// The table is a process singleton; creating it again returns the same one
fn global_table() -> Result<IGlobalInterfaceTable, ComError> {
    unsafe { CoCreateInstance(&StdGlobalInterfaceTable, None, CLSCTX_INPROC_SERVER) }
        .map_err(|e| com_error("CoCreateInstance(StdGlobalInterfaceTable)", &e, None))
}

fn com_error(member: &str, err: &windows::core::Error, except: Option<&EXCEPINFO>) -> ComError {
    let code = err.code().0 as u32;
    if UNAVAILABLE_HRESULTS.contains(&code) {
        return ComError::Unavailable(format!("{member}: {}", err.message()));
    }
    let message = match except {
        Some(except) if code == DISP_E_EXCEPTION.0 as u32 => {
            if except.bstrDescription.is_empty() {
                "Excel raised an exception without a description".to_string()
            } else {
                except.bstrDescription.to_string()
            }
        }
        _ => err.message().to_string(),
    };
    ComError::Call {
        member: member.to_string(),
        message,
    }
}
