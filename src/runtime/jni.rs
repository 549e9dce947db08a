//! JVM binding for the managed-runtime boundary.

use ::jni::objects::{GlobalRef, JMethodID, JObject, JValue, JValueOwned};
use ::jni::signature::{Primitive, ReturnType};
use ::jni::{JNIEnv, JavaVM};

use super::{CallShape, ManagedRuntime, ManagedValue, RuntimeBinding, RuntimeError};

const OBJECT_ARG_VOID: &str = "(Ljava/lang/Object;)V";
const OBJECT_ARG_OBJECT: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";
const FALLBACK_EXCEPTION: &str = "java/lang/RuntimeException";

impl From<::jni::errors::Error> for RuntimeError {
    fn from(err: ::jni::errors::Error) -> Self {
        RuntimeError::Call(err.to_string())
    }
}

#[derive(Clone, Copy)]
pub struct JniMethod {
    id: JMethodID,
    shape: CallShape,
}

pub struct JniRuntime {
    vm: JavaVM,
}

impl JniRuntime {
    pub fn new(vm: JavaVM) -> Self {
        Self { vm }
    }

    pub fn from_env(env: &JNIEnv<'_>) -> Result<Self, RuntimeError> {
        Ok(Self::new(env.get_java_vm()?))
    }

    /// Promotes a listener argument to a reference that outlives the call.
    pub fn listener(
        env: &JNIEnv<'_>,
        obj: &JObject<'_>,
    ) -> Result<Option<GlobalRef>, RuntimeError> {
        if obj.is_null() {
            return Ok(None);
        }
        Ok(Some(env.new_global_ref(obj)?))
    }

    fn env(&self) -> Result<JNIEnv<'_>, RuntimeError> {
        self.vm.get_env().map_err(|_| RuntimeError::Unavailable)
    }

    fn find_method(
        env: &mut JNIEnv<'_>,
        listener: &GlobalRef,
        name: &str,
        sig: &str,
    ) -> Option<JMethodID> {
        let class = env.get_object_class(listener.as_obj()).ok()?;
        match env.get_method_id(&class, name, sig) {
            Ok(id) => Some(id),
            Err(_) => {
                // NoSuchMethodError stays pending otherwise.
                let _ = env.exception_clear();
                None
            }
        }
    }

    fn to_java<'local>(
        env: &mut JNIEnv<'local>,
        arg: ManagedValue,
    ) -> Result<JObject<'local>, RuntimeError> {
        match arg {
            ManagedValue::Null | ManagedValue::Object => Ok(JObject::null()),
            ManagedValue::Float(value) => env
                .call_static_method(
                    "java/lang/Float",
                    "valueOf",
                    "(F)Ljava/lang/Float;",
                    &[JValue::Float(value)],
                )
                .and_then(|boxed| boxed.l())
                .map_err(RuntimeError::from),
            ManagedValue::Bool(value) => env
                .call_static_method(
                    "java/lang/Boolean",
                    "valueOf",
                    "(Z)Ljava/lang/Boolean;",
                    &[JValue::Bool(value.into())],
                )
                .and_then(|boxed| boxed.l())
                .map_err(RuntimeError::from),
            ManagedValue::Str(value) => Ok(JObject::from(env.new_string(value)?)),
        }
    }

    fn from_java(env: &mut JNIEnv<'_>, value: JObject<'_>) -> ManagedValue {
        if value.is_null() {
            return ManagedValue::Null;
        }
        match env.is_instance_of(&value, "java/lang/Boolean") {
            Ok(true) => env
                .call_method(&value, "booleanValue", "()Z", &[])
                .and_then(|v| v.z())
                .map(ManagedValue::Bool)
                .unwrap_or(ManagedValue::Object),
            _ => ManagedValue::Object,
        }
    }

    fn take_exception(env: &mut JNIEnv<'_>) -> Option<RuntimeError> {
        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_describe();
            let _ = env.exception_clear();
            return Some(RuntimeError::Exception("listener threw".to_string()));
        }
        None
    }
}

impl ManagedRuntime for JniRuntime {
    type Listener = GlobalRef;
    type Method = JniMethod;

    fn is_current_thread_attached(&self) -> bool {
        self.vm.get_env().is_ok()
    }

    fn attach_current_thread(&self) -> Result<(), RuntimeError> {
        self.vm
            .attach_current_thread_permanently()
            .map(|_| ())
            .map_err(|err| RuntimeError::AttachFailed(err.to_string()))
    }

    fn detach_current_thread(&self) {
        // Only called by a binding that attached this thread and holds no
        // local references beyond its own scope.
        unsafe { self.vm.detach_current_thread() }
    }

    fn resolve(
        &self,
        _binding: &RuntimeBinding<'_, Self>,
        listener: &GlobalRef,
        shape: CallShape,
    ) -> Option<JniMethod> {
        let mut env = self.env().ok()?;
        let candidates: &[(&str, &str)] = match shape {
            CallShape::Consumer => &[("accept", OBJECT_ARG_VOID)],
            CallShape::Function => &[("apply", OBJECT_ARG_OBJECT), ("invoke", OBJECT_ARG_OBJECT)],
        };
        candidates.iter().find_map(|(name, sig)| {
            Self::find_method(&mut env, listener, name, sig).map(|id| JniMethod { id, shape })
        })
    }

    fn invoke(
        &self,
        _binding: &RuntimeBinding<'_, Self>,
        listener: &GlobalRef,
        method: &JniMethod,
        arg: ManagedValue,
    ) -> Result<ManagedValue, RuntimeError> {
        let mut env = self.env()?;
        env.with_local_frame(8, |env| -> Result<ManagedValue, RuntimeError> {
            let arg = Self::to_java(env, arg)?;
            let return_type = match method.shape {
                CallShape::Consumer => ReturnType::Primitive(Primitive::Void),
                CallShape::Function => ReturnType::Object,
            };
            // The method id was resolved against this listener's class with the
            // matching one-object-argument signature.
            let result: Result<JValueOwned<'_>, _> = unsafe {
                env.call_method_unchecked(
                    listener.as_obj(),
                    method.id,
                    return_type,
                    &[JValue::Object(&arg).as_jni()],
                )
            };
            if let Some(err) = Self::take_exception(env) {
                return Err(err);
            }
            match result {
                Ok(JValueOwned::Object(value)) => Ok(Self::from_java(env, value)),
                Ok(_) => Ok(ManagedValue::Null),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn raise(&self, _binding: &RuntimeBinding<'_, Self>, class: &str, message: &str) {
        let Ok(mut env) = self.env() else {
            return;
        };
        if env.exception_check().unwrap_or(false) {
            return;
        }
        if env.throw_new(class, message).is_err() {
            let _ = env.exception_clear();
            let _ = env.throw_new(FALLBACK_EXCEPTION, message);
        }
    }
}
